use serde::{Deserialize, Serialize};

/// A vehicle, keyed by its VIN. Created explicitly or lazily on the first
/// trip that references an unknown VIN.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub vin: String,
    #[serde(default)]
    pub custom_name: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub license_plate: Option<String>,
}
