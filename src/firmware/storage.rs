use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

use anyhow::Result;
use ossm_stroke::settings::EngineConfig;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

const NAMESPACE: &str = "ossm";
const ENGINE_CONFIG_KEY: &str = "engine_config";
const PIN_CONFIGURATION_KEY: &str = "pin_configuration";

pub struct StorageManager {
    nvs: EspNvs<NvsDefault>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PinConfiguration {
    pub modbus_tx: u32,
    pub modbus_rx: u32,
    pub modbus_de_re: u32,
}

impl Default for PinConfiguration {
    fn default() -> Self {
        Self {
            modbus_tx: 18,
            modbus_rx: 19,
            modbus_de_re: 20,
        }
    }
}

impl StorageManager {
    pub fn new(nvs_partition: EspDefaultNvsPartition) -> Result<Self> {
        let nvs = EspNvs::new(nvs_partition, NAMESPACE, true)
            .map_err(|e| anyhow::anyhow!("Failed to open NVS namespace {}: {}", NAMESPACE, e))?;
        Ok(Self { nvs })
    }

    fn get_string(&self, key: &str, max_len: usize) -> Result<String> {
        let mut buf = vec![0u8; max_len];
        let value = self
            .nvs
            .get_str(key, &mut buf)
            .map_err(|e| anyhow::anyhow!("Failed to get string by key {}: {}", key, e))?;
        value
            .map(|s| s.trim_end_matches('\0').to_string())
            .ok_or_else(|| anyhow::anyhow!("String value not found by key: {}", key))
    }

    fn set_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.nvs.set_str(key, &json)?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let string = self.get_string(key, 1024)?;
        serde_json::from_str(&string)
            .map_err(|e| anyhow::anyhow!("Failed to get JSON by key {}: {}", key, e))
    }

    pub fn set_ssid(&mut self, ssid: &str) -> Result<()> {
        self.nvs.set_str("ssid", ssid)?;
        Ok(())
    }

    pub fn get_ssid(&self) -> Result<String> {
        self.get_string("ssid", 33)
    }

    pub fn set_password(&mut self, password: &str) -> Result<()> {
        self.nvs.set_str("password", password)?;
        Ok(())
    }

    pub fn get_password(&self) -> Result<String> {
        self.get_string("password", 65)
    }

    /// Stores the config with its play controls clamped.
    pub fn set_engine_config(&mut self, config: &EngineConfig) -> Result<()> {
        self.set_json(ENGINE_CONFIG_KEY, &config.clone().sanitized())
    }

    pub fn get_engine_config(&self) -> Result<EngineConfig> {
        self.get_json(ENGINE_CONFIG_KEY)
    }

    pub fn set_pin_configuration(&mut self, config: &PinConfiguration) -> Result<()> {
        self.set_json(PIN_CONFIGURATION_KEY, config)
    }

    pub fn get_pin_configuration(&self) -> Result<PinConfiguration> {
        self.get_json(PIN_CONFIGURATION_KEY)
    }
}
