// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Laser Geometry Inspection Core
//!
//! Control core for a RIFTEK RS-485 laser-geometry inspection stand, exposed
//! over Modbus TCP. Reads four displacement sensors, runs calibration and
//! measurement cycles driven by a Modbus holding register, evaluates
//! quality against configured tolerances, and persists a register snapshot
//! across restarts.
//!
//! ## Main Components
//!
//! - **Registers**: the shared Register Store and its named offset map
//! - **Sensor**: the RS-485 driver thread and wire protocol
//! - **Calibration**: per-command calibration collectors and formulas
//! - **Measurement**: windowed filtering, reduction, and measurement phases
//! - **Quality**: tolerance evaluation and cycle verdict aggregation
//! - **State machine**: command-register-driven phase transitions
//! - **Persistence**: SQLite-backed register snapshot
//! - **Modbus**: the TCP slave exposing the Register Store
//! - **Daemon**: task/thread lifecycle coordination
//! - **Config**: YAML configuration with JSON Schema validation
//!
//! ## Usage
//!
//! This library is primarily consumed through the `main` binary, which wires
//! the above components together. It can also be embedded directly by code
//! that wants access to the Register Store outside of Modbus.

/// Configuration handling for the inspection core.
pub mod config;

/// Error types shared by the calibration, measurement, and quality engines.
pub mod error;

/// Per-command calibration collectors and closed-form result formulas.
pub mod calibration;

/// Task/thread lifecycle coordination: sensor driver, control loop,
/// persistence poll, and Modbus server.
pub mod daemon;

/// Windowed filtering, diameter pairing, and measurement phases.
pub mod measurement;

/// Modbus TCP slave exposing the Register Store.
pub mod modbus;

/// Register snapshot persistence.
pub mod persistence;

/// Quality tolerance evaluation and cycle verdict aggregation.
pub mod quality;

/// The shared Register Store and its named offset map.
pub mod registers;

/// RS-485 sensor driver thread and wire protocol.
pub mod sensor;

/// Command-register-driven state machine.
pub mod state_machine;
