//! Authorization: role, tier, device scope, environment and capability
//! checks over a resolved device.

pub mod device;
pub mod engine;
pub mod tier;

pub use device::{Device, DeviceRegistry, Environment, InMemoryDeviceRegistry, RegistryError};
pub use engine::{AuthorizationEngine, CapabilityFlag, Decision, DenyReason};
pub use tier::ToolTier;
