use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::delivery::DeliveryDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub dispatcher: DeliveryDispatcher,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, dispatcher: DeliveryDispatcher) -> Self {
        Self {
            settings: Arc::new(settings),
            dispatcher,
            start_time: Instant::now(),
        }
    }
}
