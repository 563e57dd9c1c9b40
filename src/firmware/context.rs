use std::sync::{Arc, Mutex};

use esp_idf_svc::hal::gpio::AnyIOPin;
use ossm_stroke::engine::SharedEngine;

use super::storage::StorageManager;

/// Handles shared by the run loop, the console and the HTTP handlers.
#[derive(Clone)]
pub struct AppContext {
    pub storage_manager: Arc<Mutex<Box<StorageManager>>>,
    pub engine: SharedEngine,
    /// GPIOs not claimed yet, by pin number.
    pub all_pins: Arc<Mutex<Vec<Option<AnyIOPin>>>>,
}
