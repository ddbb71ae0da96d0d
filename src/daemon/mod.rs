//! # Daemon Module
//!
//! The daemon module coordinates the background tasks and threads that make
//! up the inspection core: the sensor driver thread, the control thread
//! running the state machine, the persistence poll, and the Modbus TCP
//! slave.
//!
//! ## Components
//!
//! * **Launch Daemon**: Core implementation for starting, monitoring, and
//!   gracefully shutting down every task and thread
//!
//! ## Usage
//!
//! ```no_run
//! use laser_geometry_core::{config::Config, daemon::Daemon};
//!
//! async fn run() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!
//!     daemon.shutdown();
//!     daemon.join().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod launch_daemon;

pub use launch_daemon::Daemon;
