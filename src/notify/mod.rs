pub mod broadcast;
pub mod sms;
