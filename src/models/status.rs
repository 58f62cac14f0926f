//! Device status documents from `GET /devices/{id}/status`

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capability name -> attribute name -> `{ "value": .., "unit": .., ... }`
/// for a single component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceStatus(pub HashMap<String, HashMap<String, Value>>);

impl DeviceStatus {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.0.contains_key(capability)
    }

    /// `capability.attribute.value`, or `None` when absent or null.
    pub fn value(&self, capability: &str, attribute: &str) -> Option<&Value> {
        self.0
            .get(capability)?
            .get(attribute)?
            .get("value")
            .filter(|v| !v.is_null())
    }

    pub fn str_value(&self, capability: &str, attribute: &str) -> Option<&str> {
        self.value(capability, attribute)?.as_str()
    }

    pub fn f64_value(&self, capability: &str, attribute: &str) -> Option<f64> {
        self.value(capability, attribute)?.as_f64()
    }

    pub fn unit(&self, capability: &str, attribute: &str) -> Option<&str> {
        self.0
            .get(capability)?
            .get(attribute)?
            .get("unit")?
            .as_str()
    }
}

/// Full status response; only the `main` component is used.
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub components: HashMap<String, DeviceStatus>,
}
