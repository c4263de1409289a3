use std::sync::Arc;

use crate::config::AppConfig;
use crate::delivery::N8nDelivery;
use crate::mapping::MappingCache;
use crate::storage::DocumentStorage;

/// Estado compartido entre los handlers de la API.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub storage: Arc<dyn DocumentStorage>,
    pub mapping_cache: Arc<MappingCache>,
    pub delivery: Option<Arc<N8nDelivery>>,
}

impl AppState {
    pub fn secret_phrase(&self) -> Option<&str> {
        self.config.frase_secreta.as_deref()
    }
}
