use std::sync::Arc;

use crate::config::Config;
use crate::observability::Metrics;
use crate::stream::StreamStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: StreamStore,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// `metrics` must be the instance `store` was opened with
    pub fn new(config: Config, store: StreamStore, metrics: Arc<Metrics>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            metrics,
        }
    }
}
