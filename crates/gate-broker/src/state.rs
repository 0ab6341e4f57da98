use std::sync::Arc;

use gate_core::{GateConfig, LockStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<LockStore>,
    pub config: Arc<GateConfig>,
}

impl AppState {
    pub fn new(store: Arc<LockStore>, config: GateConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }
}
