// lib.rs
#![warn(clippy::large_futures)]

pub use anyhow::{anyhow, bail};
pub use log::*;
pub use tokio::time::{sleep, timeout, Duration};

pub const FW_VERSION: &str = env!("CARGO_PKG_VERSION");

mod platform;
pub use platform::*;

mod throttle;
pub use throttle::*;

mod retained;
pub use retained::*;

mod config;
pub use config::*;

mod measure;
pub use measure::*;

mod mqtt;
pub use mqtt::*;

mod power;
pub use power::*;

#[cfg(target_os = "espidf")]
mod board;
#[cfg(target_os = "espidf")]
pub use board::*;

#[cfg(target_os = "espidf")]
mod bme_sensor;
#[cfg(target_os = "espidf")]
pub use bme_sensor::*;

#[cfg(target_os = "espidf")]
mod nvs_store;
#[cfg(target_os = "espidf")]
pub use nvs_store::*;

#[cfg(target_os = "espidf")]
mod wifi;
#[cfg(target_os = "espidf")]
pub use wifi::*;

#[cfg(target_os = "espidf")]
mod mqtt_client;
#[cfg(target_os = "espidf")]
pub use mqtt_client::*;

#[cfg(test)]
mod testutil;

// EOF
