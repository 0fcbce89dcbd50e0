use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::Config;
use crate::console::ConsoleRegistry;
use crate::store::DynStoreConnector;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub connector: DynStoreConnector,
    pub consoles: Arc<Mutex<ConsoleRegistry>>,
}

impl AppState {
    pub fn new(config: Config, connector: DynStoreConnector) -> Self {
        let consoles = ConsoleRegistry::new(config.console.max_consoles);
        Self {
            config,
            connector,
            consoles: Arc::new(Mutex::new(consoles)),
        }
    }
}
