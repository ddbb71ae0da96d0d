//! Modbus TCP slave exposing the Register Store as the sole external
//! contract with the HMI/PLC, per spec.md §6.
//!
//! ## Register map
//!
//! See `crate::registers::map` for the full named offset table. Holding
//! registers (40001+) are HMI-writable; input registers (30001+) are
//! system-writable and HMI-readable only.

pub mod modbus_server;
pub use modbus_server::RegisterStoreModbusServer;
