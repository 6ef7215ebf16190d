pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod notify;
pub mod payments;
pub mod store;
pub mod validation;
