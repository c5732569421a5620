//! Docker Machine driver for Hetzner Cloud.
//!
//! A [`Driver`] binds host-supplied options, provisions a server with its
//! keys and placement, and operates on it afterwards. Everything it learns
//! about remote resources is kept in the serializable machine record.

pub mod cloud;
pub mod dangling;
pub mod driver;
pub mod error;
pub mod flags;
pub mod hetzner;
pub mod instrumentation;
pub mod lifecycle;
pub mod networking;
pub mod options;
pub mod placement;
pub mod provision;
pub mod ssh_keys;
pub mod types;

mod actions;
mod config;
mod lookup;

#[cfg(test)]
mod test_support;

pub use cloud::{ApiError, CloudApi};
pub use driver::{DRIVER_NAME, Driver, DriverConfig, MachineBase, RemoteState};
pub use error::{ConfigError, Error, Result};
pub use flags::{CREATE_FLAGS, Flag, FlagKind};
pub use hetzner::HetznerCloud;
pub use lifecycle::MachineState;
pub use options::{DriverOptions, MapOptions, OptionValue};
pub use provision::ProvisionStage;
