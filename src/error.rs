//! Internal error taxonomy for the engines (calibration, measurement, quality).
//!
//! Engines never let these escape past the state machine: `state_machine`
//! catches every `EngineError` and turns it into a status code written to
//! the status register, per the error-handling design.

use thiserror::Error;

/// Errors raised by the calibration/measurement/quality engines.
///
/// Transport and I/O errors (serial, SQLite, Modbus) are handled separately
/// with `anyhow::Context` at their own thread/task boundaries; this enum is
/// strictly for the control-core math and state transitions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("precondition failed: {0}")]
    Precondition(&'static str),

    #[error("arithmetic error: {0}")]
    Arithmetic(&'static str),

    #[error("no samples collected for phase")]
    EmptyBuffer,
}

pub type EngineResult<T> = Result<T, EngineError>;
