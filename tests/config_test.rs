// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use laser_geometry_core::config::{Config, ModbusConfig, PersistenceConfig, SerialConfig};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_config_load_and_save() -> Result<()> {
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    let config = Config {
        serial: SerialConfig {
            device: "/dev/ttyUSB2".to_string(),
            baud: 115_200,
            reconnect_delay_ms: 2000,
            max_consecutive_errors: 3,
        },
        modbus: ModbusConfig {
            enabled: true,
            address: "192.168.1.1".to_string(),
            port: 1502,
            slave_id: 5,
        },
        persistence: PersistenceConfig {
            enabled: false,
            database_path: "test.sqlite".to_string(),
            poll_interval_ms: 500,
        },
        references: Default::default(),
    };

    config.save_to_file(&config_path)?;

    let loaded_config = Config::from_file(&config_path)?;
    assert_eq!(loaded_config.modbus.port, 1502);
    assert_eq!(loaded_config.modbus.address, "192.168.1.1");
    assert_eq!(loaded_config.serial.device, "/dev/ttyUSB2");

    let non_existent_path = temp_dir.path().join("non_existent.yaml");
    let default_config = Config::from_file(&non_existent_path)?;
    assert!(non_existent_path.exists());
    assert_eq!(default_config.modbus.port, 502);
    assert_eq!(default_config.serial.device, "/dev/ttyUSB0");

    let mut config = Config::default();
    assert_eq!(config.modbus.port, 502);
    assert_eq!(config.serial.device, "/dev/ttyUSB0");

    config.apply_args(
        Some("/dev/ttyUSB7".to_string()),
        Some(true),
        Some("10.0.0.1".to_string()),
        Some(1503),
        None,
    );

    assert_eq!(config.serial.device, "/dev/ttyUSB7");
    assert_eq!(config.modbus.address, "10.0.0.1");
    assert_eq!(config.modbus.port, 1503);
    assert!(config.modbus.enabled);
    // database_path untouched since the override was None
    assert_eq!(config.persistence.database_path, "registers.sqlite");

    Ok(())
}

#[test]
fn test_yaml_validation() -> Result<()> {
    let temp_dir = tempdir()?;

    let valid_path = temp_dir.path().join("valid_config.yaml");
    let valid_yaml = r#"
serial:
  device: "/dev/ttyUSB0"
  baud: 921600
modbus:
  enabled: true
  address: "0.0.0.0"
  port: 502
persistence:
  enabled: true
  database_path: "registers.sqlite"
"#;
    fs::write(&valid_path, valid_yaml)?;
    let result = Config::from_file(&valid_path);
    assert!(result.is_ok(), "valid YAML should pass validation: {:?}", result.err());

    let wrong_field_path = temp_dir.path().join("wrong_field.yaml");
    let wrong_field_yaml = r#"
modbus:
  wrong_port: 8080
"#;
    fs::write(&wrong_field_path, wrong_field_yaml)?;
    let result = Config::from_file(&wrong_field_path);
    assert!(
        result.is_err(),
        "YAML with an unknown field should fail schema validation"
    );

    let invalid_range_path = temp_dir.path().join("invalid_range.yaml");
    let invalid_range_yaml = r#"
modbus:
  port: 99999
"#;
    fs::write(&invalid_range_path, invalid_range_yaml)?;
    let result = Config::from_file(&invalid_range_path);
    assert!(
        result.is_err(),
        "Modbus port outside the valid range should fail validation"
    );

    let invalid_slave_id_path = temp_dir.path().join("invalid_slave_id.yaml");
    let invalid_slave_id_yaml = r#"
modbus:
  slave_id: 0
"#;
    fs::write(&invalid_slave_id_path, invalid_slave_id_yaml)?;
    let result = Config::from_file(&invalid_slave_id_path);
    assert!(
        result.is_err(),
        "Modbus slave id of 0 should fail schema validation"
    );

    Ok(())
}

#[test]
fn test_show_config_schema_is_valid_json() -> Result<()> {
    let schema_str = include_str!("../resources/config.schema.json");
    let schema: serde_json::Value = serde_json::from_str(schema_str)?;
    assert!(schema.get("properties").is_some());
    Ok(())
}
