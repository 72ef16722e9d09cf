use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::TicketBackend;

#[derive(Clone)]
pub struct AppContext {
    pub config: AppConfig,
    pub backend: Arc<dyn TicketBackend>,
}

impl AppContext {
    pub fn new(config: AppConfig, backend: Arc<dyn TicketBackend>) -> Self {
        Self { config, backend }
    }
}
