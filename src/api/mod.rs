pub mod accounts;
pub mod announcements;
pub mod anonymous;
pub mod baptisms;
pub mod broadcasts;
pub mod contacts;
pub mod events;
pub mod helpers;
pub mod payments;
pub mod users;

use axum::Router;

use crate::store::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(users::router())
        .merge(announcements::router())
        .merge(anonymous::router())
        .merge(baptisms::router())
        .merge(broadcasts::router())
        .merge(accounts::router())
        .merge(contacts::router())
        .merge(events::router())
        .merge(payments::router())
}
