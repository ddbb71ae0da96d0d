//! # Daemon Management Module
//!
//! This module provides functionality for running and managing the
//! background tasks (daemons) that make up the inspection core. It handles
//! the lifecycle of:
//!
//! - The sensor driver thread, talking to the RIFTEK quad over RS-485
//! - The control thread, running the state machine against each sample
//! - The register snapshot persistence poll
//! - The Modbus TCP slave
//!
//! ## Architecture
//!
//! The sensor and control loops run on native OS threads (`std::thread`) so
//! they can hold tight synchronous read timeouts and request elevated
//! scheduling priority, per spec.md §5. Persistence and Modbus run as Tokio
//! tasks. The daemon structure tracks both kinds of task and coordinates
//! their shutdown through a shared `running` flag.
//!
//! ## Usage
//!
//! ```no_run
//! use laser_geometry_core::{config::Config, daemon::Daemon};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config).await?;
//!
//!     daemon.shutdown();
//!     daemon.join().await?;
//!
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::Config;
use crate::modbus::RegisterStoreModbusServer;
use crate::persistence::{self, PersistenceStore};
use crate::registers::RegisterStore;
use crate::sensor::driver::{self, DriverRequest, RingBuffer, Sample, SensorConfig};
use crate::state_machine::StateMachine;

use tokio::net::TcpListener;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};

const SAMPLE_BUFFER_CAPACITY: usize = 64;
const SAMPLE_POP_TIMEOUT: Duration = Duration::from_millis(200);

/// Coordinates every background task of the inspection core.
///
/// # Fields
///
/// * `tasks` - Tokio task handles (persistence, Modbus)
/// * `native_threads` - native OS thread handles (sensor driver, control loop)
/// * `running` - shared flag signalling shutdown to every task and thread
/// * `store` - the shared Register Store, the sole external contract
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    native_threads: Vec<std::thread::JoinHandle<()>>,
    running: Arc<AtomicBool>,
    store: Arc<RegisterStore>,
    samples: Option<Arc<RingBuffer<Sample>>>,
    sensor_ok: Option<Arc<AtomicBool>>,
}

impl Daemon {
    /// Create a new daemon instance with a fresh, zeroed Register Store.
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            native_threads: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            store: Arc::new(RegisterStore::new()),
            samples: None,
            sensor_ok: None,
        }
    }

    /// Launch all configured tasks based on configuration.
    ///
    /// Restores any persisted register snapshot before the control thread
    /// starts, per spec.md §9's restore-before-state-machine-runs ordering.
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        let persistence = if config.persistence.enabled {
            let store = PersistenceStore::open(&config.persistence.database_path)?;
            Some(Arc::new(store))
        } else {
            None
        };

        if let Some(persistence) = &persistence {
            persistence::restore(persistence, &self.store)?;
            self.apply_reference_seeds(config, persistence)?;
        }

        let (driver_tx, driver_rx) = mpsc::sync_channel::<DriverRequest>(4);

        self.start_sensor_driver(config, driver_rx);
        self.start_control_loop(driver_tx);

        if let Some(persistence) = persistence {
            self.start_persistence(persistence, config);
        }

        if config.modbus.enabled {
            self.start_modbus_server(config).await?;
        }

        Ok(())
    }

    /// Seeds the reference holding registers from `config.references` if the
    /// persisted database had no prior snapshot for them, so a fresh install
    /// is usable without an HMI ever having written a reference value.
    fn apply_reference_seeds(&self, config: &Config, persistence: &PersistenceStore) -> Result<()> {
        use crate::registers::{map::holding, Bank};

        let has_prior = !persistence.load_all()?.is_empty();
        if has_prior {
            return Ok(());
        }

        let refs = &config.references;
        if let Some(v) = refs.wall_mm {
            self.store.set_f32(Bank::Holding, holding::REF_WALL, v);
        }
        if let Some(v) = refs.bottom_mm {
            self.store.set_f32(Bank::Holding, holding::REF_BOTTOM, v);
        }
        if let Some(v) = refs.body_diameter_mm {
            self.store.set_f32(Bank::Holding, holding::REF_BODY_DIAMETER, v);
        }
        if let Some(v) = refs.height_mm {
            self.store.set_f32(Bank::Holding, holding::REF_HEIGHT, v);
        }
        Ok(())
    }

    /// Start the sensor driver thread reading the RS-485 bus.
    fn start_sensor_driver(&mut self, config: &Config, driver_rx: mpsc::Receiver<DriverRequest>) {
        info!("Starting sensor driver on {}", config.serial.device);

        let sensor_config = SensorConfig {
            device: config.serial.device.clone(),
            baud_rate: config.serial.baud,
            reconnect_delay: Duration::from_millis(config.serial.reconnect_delay_ms),
            max_consecutive_errors: config.serial.max_consecutive_errors,
        };

        let samples = Arc::new(RingBuffer::new(SAMPLE_BUFFER_CAPACITY));
        let sensor_ok = Arc::new(AtomicBool::new(false));
        let running = self.running.clone();

        self.samples = Some(samples.clone());
        self.sensor_ok = Some(sensor_ok.clone());

        let handle = driver::spawn(sensor_config, samples, sensor_ok, running, driver_rx);
        self.native_threads.push(handle);
    }

    /// Start the control thread: drains the sensor ring buffer and runs the
    /// state machine against each sample and each command-register change.
    fn start_control_loop(&mut self, driver_tx: mpsc::SyncSender<DriverRequest>) {
        info!("Starting control loop");

        let samples = self
            .samples
            .clone()
            .expect("start_sensor_driver must run before start_control_loop");
        let store = self.store.clone();
        let running = self.running.clone();

        let handle = std::thread::Builder::new()
            .name("control-loop".to_string())
            .spawn(move || {
                let mut state_machine = StateMachine::new();
                while running.load(Ordering::SeqCst) {
                    if let Some(snapshot) = state_machine.poll(&store, &driver_tx) {
                        info!(
                            "shift {} closed: total={} good={} cond_good={} bad={}",
                            snapshot.shift,
                            snapshot.counters.total,
                            snapshot.counters.good,
                            snapshot.counters.cond_good,
                            snapshot.counters.bad
                        );
                    }

                    if let Some(sample) = samples.pop_blocking(SAMPLE_POP_TIMEOUT) {
                        state_machine.accept_sample(&store, sample);
                    }
                }
                debug!("control loop thread stopping");
            })
            .expect("failed to spawn control-loop thread");

        self.native_threads.push(handle);
    }

    /// Start the register snapshot persistence poll.
    fn start_persistence(&mut self, persistence: Arc<PersistenceStore>, config: &Config) {
        info!(
            "Starting persistence poll every {}ms against {}",
            config.persistence.poll_interval_ms, config.persistence.database_path
        );

        let store = self.store.clone();
        let running = self.running.clone();

        let task = tokio::spawn(async move {
            persistence::run(persistence, store, running).await;
            Ok(())
        });

        self.tasks.push(task);
    }

    /// Launch the Modbus TCP slave.
    async fn start_modbus_server(&mut self, config: &Config) -> Result<()> {
        info!(
            "Starting modbus server on {}:{}",
            config.modbus.address, config.modbus.port
        );
        let config = config.clone();
        let running = self.running.clone();
        let store = self.store.clone();

        let task = tokio::spawn(async move {
            let socket_addr: SocketAddr = format!("{}:{}", config.modbus.address, config.modbus.port)
                .parse()
                .context("invalid Modbus socket address")?;
            let listener = TcpListener::bind(socket_addr).await?;

            let server = Server::new(listener);

            // A single shared service instance is sufficient: the register
            // store is already internally synchronized, and the Modbus spec
            // only expects one master talking to a given slave at a time.
            let on_connected = move |stream, socket_addr| {
                let store_clone = store.clone();
                async move {
                    accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                        Ok(Some(RegisterStoreModbusServer::new(store_clone.clone())))
                    })
                }
            };

            let on_process_error = |err| {
                error!("Modbus server error: {err}");
            };

            let server_handle = tokio::spawn(async move {
                if let Err(e) = server.serve(&on_connected, on_process_error).await {
                    error!("Modbus server error: {}", e);
                }
            });

            while running.load(Ordering::SeqCst) {
                time::sleep(Duration::from_secs(1)).await;
            }

            info!("Shutting down Modbus server...");
            server_handle.abort();
            match tokio::time::timeout(Duration::from_secs(5), server_handle).await {
                Ok(_) => info!("Modbus server shut down successfully"),
                Err(_) => warn!("Modbus server shutdown timed out, forcing termination"),
            }

            Ok(())
        });

        self.tasks.push(task);
        info!("Modbus server started");
        Ok(())
    }

    /// Get the shared register store, e.g. for an embedding application that
    /// wants to peek at live values outside of Modbus.
    pub fn get_store(&self) -> Arc<RegisterStore> {
        self.store.clone()
    }

    /// Signal all tasks and threads to stop. Does not wait for them; call
    /// `join()` afterwards.
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for every Tokio task and native thread to finish.
    ///
    /// Tokio tasks are awaited with a 10s timeout; native threads are joined
    /// directly, since the control loop's `pop_blocking` timeout bounds how
    /// long it takes to notice `running` has cleared.
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match tokio::time::timeout(Duration::from_secs(10), task).await {
                Ok(result) => {
                    if let Err(e) = result {
                        error!("Task panicked: {}", e);
                    }
                }
                Err(_) => warn!("Task did not complete within timeout period, may be hung"),
            }
        }

        for handle in self.native_threads {
            if handle.join().is_err() {
                error!("native thread panicked during shutdown");
            }
        }

        Ok(())
    }
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}
