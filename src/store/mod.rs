pub mod bootstrap;
pub mod pool;
pub mod valkey;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::notify::sms::ArkeselClient;
use crate::payments::momo::MomoClient;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub valkey: fred::clients::Pool,
    pub config: Arc<Config>,
    pub sms: Arc<ArkeselClient>,
    pub momo: Arc<MomoClient>,
}
