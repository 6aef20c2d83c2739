//! Bridge configuration.

use ferry_abi::layout::{
    EXPORT_FREE, EXPORT_MALLOC, EXPORT_MEMORY, EXPORT_REALLOC, EXPORT_START, EXPORT_TABLE,
    IMPORT_MODULE,
};
use serde::{Deserialize, Serialize};

use crate::error::BridgeResult;
use crate::table::DEFAULT_TABLE_BATCH;

/// Names of the guest exports the bridge resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportNames {
    pub memory: String,
    pub malloc: String,
    pub realloc: String,
    pub free: String,
    /// Entry point; optional in the guest.
    pub start: String,
    pub table: String,
}

impl Default for ExportNames {
    fn default() -> Self {
        Self {
            memory: EXPORT_MEMORY.to_string(),
            malloc: EXPORT_MALLOC.to_string(),
            realloc: EXPORT_REALLOC.to_string(),
            free: EXPORT_FREE.to_string(),
            start: EXPORT_START.to_string(),
            table: EXPORT_TABLE.to_string(),
        }
    }
}

/// Configuration for a [`Bridge`](crate::Bridge).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// let config = ferry_core::BridgeConfig::from_json(r#"{ "fuel": 100000 }"#).unwrap();
/// assert_eq!(config.fuel, Some(100_000));
/// assert_eq!(config.import_module, "ferry");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Import module the intrinsics are registered under.
    pub import_module: String,
    pub exports: ExportNames,
    /// Slots added to the object table each time it fills up.
    pub table_batch: usize,
    /// Fuel budget for guest execution; `None` runs unmetered.
    pub fuel: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            import_module: IMPORT_MODULE.to_string(),
            exports: ExportNames::default(),
            table_batch: DEFAULT_TABLE_BATCH,
            fuel: None,
        }
    }
}

impl BridgeConfig {
    pub fn from_json(json: &str) -> BridgeResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> BridgeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = Some(fuel);
        self
    }
}
