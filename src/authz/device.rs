//! Device attributes consulted by the authorization engine.
//!
//! Devices are owned by the external device registry; this crate only reads
//! them. The [`DeviceRegistry`] trait is the seam the surrounding application
//! implements, and [`InMemoryDeviceRegistry`] backs tests and the CLI.

use std::fmt;
use std::str::FromStr;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Operating environment of a device or of the service itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Lab devices (the default for a fresh deployment)
    #[default]
    Lab,
    /// Pre-production devices
    Staging,
    /// Production devices
    Prod,
}

impl Environment {
    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lab => "lab",
            Self::Staging => "staging",
            Self::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lab" => Ok(Self::Lab),
            "staging" => Ok(Self::Staging),
            "prod" | "production" => Ok(Self::Prod),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// The subset of a device record the authorization engine needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Registry identifier
    pub id: String,
    /// Environment the device belongs to
    pub environment: Environment,
    /// Permits `advanced`-tier (configuration write) tools
    #[serde(default)]
    pub allow_advanced_writes: bool,
    /// Permits `professional`-tier (multi-device, reboot) tools
    #[serde(default)]
    pub allow_professional_workflows: bool,
}

impl Device {
    /// A device with every capability flag off.
    #[must_use]
    pub fn new(id: impl Into<String>, environment: Environment) -> Self {
        Self {
            id: id.into(),
            environment,
            allow_advanced_writes: false,
            allow_professional_workflows: false,
        }
    }

    /// Builder: set `allow_advanced_writes`.
    #[must_use]
    pub fn with_advanced_writes(mut self, allowed: bool) -> Self {
        self.allow_advanced_writes = allowed;
        self
    }

    /// Builder: set `allow_professional_workflows`.
    #[must_use]
    pub fn with_professional_workflows(mut self, allowed: bool) -> Self {
        self.allow_professional_workflows = allowed;
        self
    }
}

/// Device lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No device with this id is registered.
    #[error("device not found: {0}")]
    NotFound(String),

    /// The registry backend could not be reached.
    #[error("device registry unavailable: {0}")]
    Unavailable(String),
}

impl RegistryError {
    /// Reason code recorded in audit events.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "device_not_found",
            Self::Unavailable(_) => "registry_unavailable",
        }
    }
}

/// Read-only view of the device registry.
///
/// Implementations must be `Send + Sync`; the engine shares them across
/// concurrent requests.
#[async_trait::async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Look up a device by id.
    async fn get(&self, device_id: &str) -> Result<Device, RegistryError>;
}

/// In-memory registry backed by a `DashMap`.
#[derive(Default)]
pub struct InMemoryDeviceRegistry {
    devices: DashMap<String, Device>,
}

impl InMemoryDeviceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a device.
    pub fn insert(&self, device: Device) {
        self.devices.insert(device.id.clone(), device);
    }

    /// Number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns `true` when no devices are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl FromIterator<Device> for InMemoryDeviceRegistry {
    fn from_iter<I: IntoIterator<Item = Device>>(iter: I) -> Self {
        let registry = Self::new();
        for device in iter {
            registry.insert(device);
        }
        registry
    }
}

#[async_trait::async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    async fn get(&self, device_id: &str) -> Result<Device, RegistryError> {
        self.devices
            .get(device_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::NotFound(device_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_aliases() {
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Prod));
        assert_eq!("production".parse::<Environment>(), Ok(Environment::Prod));
        assert_eq!(" lab ".parse::<Environment>(), Ok(Environment::Lab));
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn device_deserializes_with_flags_defaulting_off() {
        // GIVEN: a YAML record without capability flags
        let device: Device = serde_yaml::from_str("id: rtr-1\nenvironment: staging\n").unwrap();

        // THEN: both flags are off
        assert_eq!(device, Device::new("rtr-1", Environment::Staging));
    }

    #[tokio::test]
    async fn registry_lookup_hit_and_miss() {
        // GIVEN: a registry with one device
        let registry: InMemoryDeviceRegistry =
            [Device::new("rtr-1", Environment::Lab).with_advanced_writes(true)]
                .into_iter()
                .collect();

        // WHEN/THEN: known id resolves, unknown id is NotFound
        let device = registry.get("rtr-1").await.unwrap();
        assert!(device.allow_advanced_writes);
        assert_eq!(
            registry.get("rtr-9").await,
            Err(RegistryError::NotFound("rtr-9".to_string()))
        );
    }
}
