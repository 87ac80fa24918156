use crate::{config::Config, services::delivery::DeliveryCoordinator};
use deadpool_postgres::Pool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool,
    pub delivery: DeliveryCoordinator,
    pub config: Arc<Config>,
}
