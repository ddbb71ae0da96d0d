// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Configuration Management
//!
//! This module implements configuration handling for the inspection core.
//! It supports loading, validating, and saving configuration from YAML files
//! using JSON Schema validation for robust error checking.
//!
//! ## Configuration Structure
//!
//! The application's configuration is organized as a nested structure with
//! sections:
//! - `serial`: RS-485 sensor transport settings
//! - `modbus`: Modbus TCP slave settings
//! - `persistence`: register snapshot database settings
//! - `references`: optional seed values for reference registers on first run
//!
//! ## Usage
//!
//! ```no_run
//! use laser_geometry_core::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     Some("/dev/ttyUSB1".to_string()), // Serial device
//!     Some(true),                       // Enable Modbus
//!     Some("0.0.0.0".to_string()),      // Modbus address
//!     Some(502),                        // Modbus port
//!     Some("registers.sqlite".to_string()), // Database path
//! );
//!
//! // Access configuration values
//! println!("Serial device: {}", config.serial.device);
//! ```

use anyhow::{Context, Result};
use jsonschema;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::Write,
    path::Path,
};

/// RS-485 transport settings for the RIFTEK sensor quad.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    #[serde(default = "default_serial_device")]
    pub device: String,

    /// Baud rate. RIFTEK RF602 sensors run at 921600 by default.
    #[serde(default = "default_baud")]
    pub baud: u32,

    /// Delay before retrying a failed port open, in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Consecutive read errors tolerated before the port is closed and
    /// reopened.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
}

fn default_serial_device() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud() -> u32 {
    921_600
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_max_consecutive_errors() -> u32 {
    5
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: default_serial_device(),
            baud: default_baud(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_consecutive_errors: default_max_consecutive_errors(),
        }
    }
}

/// Modbus TCP slave settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    #[serde(default = "default_modbus_enabled")]
    pub enabled: bool,

    #[serde(default = "default_modbus_address")]
    pub address: String,

    #[serde(default = "default_modbus_port")]
    pub port: u16,

    /// Modbus slave/unit identifier reported to connecting clients.
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
}

fn default_modbus_enabled() -> bool {
    true
}

fn default_modbus_address() -> String {
    "0.0.0.0".to_string()
}

fn default_modbus_port() -> u16 {
    502
}

fn default_slave_id() -> u8 {
    1
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            enabled: default_modbus_enabled(),
            address: default_modbus_address(),
            port: default_modbus_port(),
            slave_id: default_slave_id(),
        }
    }
}

/// Register snapshot persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_persistence_enabled")]
    pub enabled: bool,

    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_persistence_enabled() -> bool {
    true
}

fn default_database_path() -> String {
    "registers.sqlite".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_persistence_enabled(),
            database_path: default_database_path(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Optional seed values for reference holding registers, applied only when
/// the persistence database has no prior snapshot, so a fresh install is
/// usable before an HMI has ever written the reference registers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferencesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_mm: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom_mm: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_diameter_mm: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_mm: Option<f32>,
}

/// Root configuration structure for the inspection core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// RS-485 sensor transport settings.
    #[serde(default)]
    pub serial: SerialConfig,

    /// Modbus TCP slave settings.
    #[serde(default)]
    pub modbus: ModbusConfig,

    /// Register snapshot persistence settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Optional reference register seed values for a fresh install.
    #[serde(default)]
    pub references: ReferencesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            modbus: ModbusConfig::default(),
            persistence: PersistenceConfig::default(),
            references: ReferencesConfig::default(),
        }
    }
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        debug!("Creating sample configuration file at {:?}", path);
        let sample_path = path.with_extension("sample.yaml");

        if let Some(parent) = sample_path.parent() {
            if !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        let sample_config = Self::default();
        sample_config
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file, creating a default one if it's missing.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;
        let json_value = serde_json::to_value(&yaml_value)
            .context("Failed to convert YAML to JSON for validation")?;

        let schema_str = include_str!("../resources/config.schema.json");
        let schema: serde_json::Value =
            serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;

        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        debug!("Validating {} configuration against schema", path.display());
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            Self::create_sample_config(path)?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config = match serde_yml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                match Self::create_sample_config(path) {
                    Ok(_) => debug!("Successfully created sample config"),
                    Err(e) => error!("Failed to create sample config: {}", e),
                }
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    path.display(),
                    err
                ));
            }
        };

        if let Err(err) = Self::validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            Self::create_sample_config(path)?;
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only values that are explicitly provided override the existing
    /// configuration.
    pub fn apply_args(
        &mut self,
        serial_device: Option<String>,
        modbus_enabled: Option<bool>,
        modbus_address: Option<String>,
        modbus_port: Option<u16>,
        database_path: Option<String>,
    ) {
        if let Some(device) = serial_device {
            debug!("Overriding serial device from command line: {}", device);
            self.serial.device = device;
        }
        if let Some(enabled) = modbus_enabled {
            debug!("Overriding Modbus enabled from command line: {}", enabled);
            self.modbus.enabled = enabled;
        }
        if let Some(address) = modbus_address {
            debug!("Overriding Modbus address from command line: {}", address);
            self.modbus.address = address;
        }
        if let Some(port) = modbus_port {
            debug!("Overriding Modbus port from command line: {}", port);
            self.modbus.port = port;
        }
        if let Some(path) = database_path {
            debug!("Overriding database path from command line: {}", path);
            self.persistence.database_path = path;
        }
    }

    /// Validate additional rules that aren't covered by the JSON schema
    fn validate_specific_rules(config: &Config) -> Result<()> {
        debug!("Performing additional validation checks");

        if config.modbus.port == 0 {
            anyhow::bail!("Invalid Modbus port number: {}", config.modbus.port);
        }

        if !is_valid_ip_address(&config.modbus.address) {
            debug!(
                "Potentially invalid Modbus address format: {}",
                config.modbus.address
            );
            // Just issue a warning but don't block
        }

        if config.serial.baud == 0 {
            anyhow::bail!("Invalid serial baud rate: {}", config.serial.baud);
        }

        Ok(())
    }
}

/// Check if a string is a valid IP address or a known special binding value.
fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
pub fn output_config_schema() -> Result<()> {
    let schema_str = include_str!("../resources/config.schema.json");
    let schema: serde_json::Value =
        serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;
    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;
    println!("{}", formatted_schema);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yml::to_string(&config).unwrap();
        let reloaded: Config = serde_yml::from_str(&yaml).unwrap();
        assert_eq!(reloaded.modbus.port, config.modbus.port);
        assert_eq!(reloaded.serial.device, config.serial.device);
    }

    #[test]
    fn apply_args_overrides_only_provided_fields() {
        let mut config = Config::default();
        let original_port = config.modbus.port;
        config.apply_args(Some("/dev/ttyUSB3".to_string()), None, None, None, None);
        assert_eq!(config.serial.device, "/dev/ttyUSB3");
        assert_eq!(config.modbus.port, original_port);
    }

    #[test]
    fn from_file_creates_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let config = Config::from_file(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.modbus.port, default_modbus_port());
    }
}
