//! Device descriptors from `GET /devices`

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: String,
    #[serde(default)]
    pub label: String,
    pub name: Option<String>,
    pub manufacturer_name: Option<String>,
    pub device_type_name: Option<String>,
    pub location_id: Option<String>,
}

impl Device {
    /// Label if set, otherwise the device name, otherwise the id.
    pub fn display_name(&self) -> &str {
        if !self.label.trim().is_empty() {
            &self.label
        } else {
            self.name.as_deref().unwrap_or(&self.device_id)
        }
    }

    /// Compares labels after trimming and NFC normalization; Hangul labels
    /// may arrive decomposed from some clients.
    pub fn matches_label(&self, label: &str) -> bool {
        normalize_label(&self.label) == normalize_label(label)
    }
}

pub fn normalize_label(label: &str) -> String {
    label.trim().nfc().collect()
}

/// One page of the device list.
#[derive(Debug, Deserialize)]
pub struct DevicePage {
    #[serde(default)]
    pub items: Vec<Device>,
    #[serde(rename = "_links", default)]
    pub links: Option<PageLinks>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageLinks {
    pub next: Option<Link>,
}

#[derive(Debug, Deserialize)]
pub struct Link {
    pub href: String,
}

impl DevicePage {
    pub fn next_href(&self) -> Option<&str> {
        self.links
            .as_ref()
            .and_then(|links| links.next.as_ref())
            .map(|link| link.href.as_str())
    }
}
