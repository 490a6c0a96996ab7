use std::sync::{Arc, RwLock};

use crate::coordinator::DeliveryCoordinator;
use crate::db::DbPool;
use crate::settings::ServerSettings;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub settings: Arc<RwLock<ServerSettings>>,
    pub coordinator: Arc<DeliveryCoordinator>,
}
