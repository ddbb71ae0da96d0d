//! Dedicated OS thread driving the RS-485 bus.
//!
//! Grounded on `original_source/main.py`'s `perform_quad_sensor_measurement`
//! for the broadcast-latch-then-read-each sequence, and on the teacher's
//! `start_data_acquisition`/`start_modbus_server` for the retry-and-log
//! shape of the outer loop. Runs as a plain `std::thread` (not a Tokio
//! task) so it can request elevated OS priority and use tight synchronous
//! read timeouts, per spec.md §5.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use super::protocol;

/// One synchronized read of all four sensors. Each field is `None` when
/// that sensor's reading is missing or out of its physical range
/// (spec.md §3) — a failed or malformed reply for one sensor never
/// invalidates the other three.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub s1: Option<f32>,
    pub s2: Option<f32>,
    pub s3: Option<f32>,
    pub s4: Option<f32>,
    pub at: Instant,
}

/// Bounded ring buffer with newest-wins overflow: once full, the oldest
/// sample is dropped to make room rather than rejecting the new one.
pub struct RingBuffer<T> {
    inner: Mutex<VecDeque<T>>,
    condvar: Condvar,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            condvar: Condvar::new(),
            capacity,
        }
    }

    pub fn push(&self, item: T) {
        let mut guard = self.inner.lock().expect("ring buffer lock poisoned");
        if guard.len() == self.capacity {
            guard.pop_front();
        }
        guard.push_back(item);
        self.condvar.notify_all();
    }

    /// Pops the oldest sample, waiting up to `timeout` for one to arrive.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<T> {
        let guard = self.inner.lock().expect("ring buffer lock poisoned");
        let (mut guard, _) = self
            .condvar
            .wait_timeout_while(guard, timeout, |q| q.is_empty())
            .expect("ring buffer lock poisoned");
        guard.pop_front()
    }

    pub fn drain(&self) -> Vec<T> {
        let mut guard = self.inner.lock().expect("ring buffer lock poisoned");
        guard.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("ring buffer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub device: String,
    pub baud_rate: u32,
    pub reconnect_delay: Duration,
    pub max_consecutive_errors: u32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 921_600,
            reconnect_delay: Duration::from_secs(5),
            max_consecutive_errors: 5,
        }
    }
}

/// A parameter write/flash-commit job the main control thread hands to the
/// sensor thread so the single serial-port owner performs it while the quad
/// read loop is paused. See DESIGN.md's CMD=106 resolution.
pub enum DriverCommand {
    WriteParameter { addr: u8, code: u16, value: u16 },
    CommitFlash { addr: u8 },
}

pub struct DriverRequest {
    pub command: DriverCommand,
    pub reply: std::sync::mpsc::SyncSender<Result<(), String>>,
}

const READ_TIMEOUT: Duration = Duration::from_millis(2);
const SENSOR_ADDRESSES: [u8; 4] = [1, 2, 3, 4];

/// Spawns the sensor thread. Returns immediately; the thread runs until
/// `running` is cleared.
pub fn spawn(
    config: SensorConfig,
    samples: Arc<RingBuffer<Sample>>,
    sensor_ok: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    commands: Receiver<DriverRequest>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("sensor-driver".to_string())
        .spawn(move || run(config, samples, sensor_ok, running, commands))
        .expect("failed to spawn sensor-driver thread")
}

fn open_port(config: &SensorConfig) -> Result<Box<dyn serialport::SerialPort>, serialport::Error> {
    serialport::new(&config.device, config.baud_rate)
        .timeout(READ_TIMEOUT)
        .open()
}

fn run(
    config: SensorConfig,
    samples: Arc<RingBuffer<Sample>>,
    sensor_ok: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    commands: Receiver<DriverRequest>,
) {
    request_elevated_priority();

    let mut port: Option<Box<dyn serialport::SerialPort>> = None;
    let mut consecutive_errors = 0u32;

    while running.load(Ordering::SeqCst) {
        if port.is_none() {
            match open_port(&config) {
                Ok(p) => {
                    info!("sensor driver connected to {}", config.device);
                    port = Some(p);
                    consecutive_errors = 0;
                }
                Err(e) => {
                    warn!("sensor driver failed to open {}: {e}", config.device);
                    sensor_ok.store(false, Ordering::SeqCst);
                    std::thread::sleep(config.reconnect_delay);
                    continue;
                }
            }
        }

        // Service any pending parameter-write requests before the next quad
        // read, while we still hold exclusive access to the port.
        if let Ok(req) = commands.try_recv() {
            let result = match port.as_deref_mut() {
                Some(p) => apply_driver_command(p, &req.command),
                None => Err("no open port".to_string()),
            };
            let _ = req.reply.send(result);
        }

        let quad = match port.as_deref_mut() {
            Some(p) => quad_read(p),
            None => Err("no open port".to_string()),
        };

        match quad {
            Ok((sample, had_error)) => {
                if had_error {
                    consecutive_errors += 1;
                } else {
                    consecutive_errors = 0;
                }
                sensor_ok.store(true, Ordering::SeqCst);
                debug!(
                    "sample s1={:?} s2={:?} s3={:?} s4={:?}",
                    sample.s1, sample.s2, sample.s3, sample.s4
                );
                samples.push(sample);
                if consecutive_errors >= config.max_consecutive_errors {
                    error!("too many consecutive sensor errors, closing port and reconnecting");
                    sensor_ok.store(false, Ordering::SeqCst);
                    port = None;
                    consecutive_errors = 0;
                    std::thread::sleep(config.reconnect_delay);
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!("sensor read error ({consecutive_errors}/{}): {e}", config.max_consecutive_errors);
                if consecutive_errors >= config.max_consecutive_errors {
                    error!("too many consecutive sensor errors, closing port and reconnecting");
                    sensor_ok.store(false, Ordering::SeqCst);
                    port = None;
                    std::thread::sleep(config.reconnect_delay);
                }
            }
        }
    }

    info!("sensor driver thread stopping");
}

fn apply_driver_command(
    port: &mut dyn serialport::SerialPort,
    command: &DriverCommand,
) -> Result<(), String> {
    match command {
        DriverCommand::WriteParameter { addr, code, value } => {
            let frame = protocol::write_parameter(*addr, *code, *value);
            port.write_all(&frame).map_err(|e| e.to_string())
        }
        DriverCommand::CommitFlash { addr } => {
            let frame = protocol::commit_to_flash(*addr);
            port.write_all(&frame).map_err(|e| e.to_string())
        }
    }
}

/// Runs one broadcast-latch-then-read-four sequence. A failure to send the
/// broadcast latch aborts the whole cycle (nothing could have latched); a
/// failure reading back one sensor only discards that sensor's reading
/// (spec.md §4.1 "the other three may still be valid"). Returns the sample
/// alongside whether any per-sensor error occurred this cycle, which feeds
/// the driver's consecutive-error reconnect counter.
fn quad_read(port: &mut dyn serialport::SerialPort) -> Result<(Sample, bool), String> {
    port.write_all(&protocol::BROADCAST_LATCH)
        .map_err(|e| format!("broadcast latch: {e}"))?;
    std::thread::sleep(Duration::from_micros(50));

    let mut readings = [None; 4];
    let mut had_error = false;
    for (i, addr) in SENSOR_ADDRESSES.iter().enumerate() {
        readings[i] = match read_one_sensor(port, *addr) {
            Ok(mm) => mm,
            Err(e) => {
                warn!("sensor {addr} read error: {e}");
                had_error = true;
                None
            }
        };
    }

    Ok((
        Sample {
            s1: readings[0],
            s2: readings[1],
            s3: readings[2],
            s4: readings[3],
            at: Instant::now(),
        },
        had_error,
    ))
}

/// Reads one sensor's latched value. Returns `Ok(None)` for a malformed
/// frame or an out-of-range decode (spec.md §7: "protocol format"/
/// "out-of-range" errors discard the sample without raising), and `Err` only
/// for a transport-level failure (write/read error), which counts toward
/// the reconnect threshold.
fn read_one_sensor(port: &mut dyn serialport::SerialPort, addr: u8) -> Result<Option<f32>, String> {
    port.write_all(&protocol::read_latched(addr))
        .map_err(|e| format!("read command: {e}"))?;
    let mut frame = [0u8; 4];
    port.read_exact(&mut frame)
        .map_err(|e| format!("read reply: {e}"))?;
    let Some(raw) = protocol::decode_frame_checked(frame) else {
        return Ok(None);
    };
    let mm = protocol::raw_to_mm(raw);
    Ok(protocol::is_valid_mm(mm).then_some(mm))
}

#[cfg(target_os = "linux")]
fn request_elevated_priority() {
    // Best effort only: a non-root process cannot raise its own priority,
    // and we'd rather run at normal priority than fail to start.
    let result = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, -10) };
    if result != 0 {
        warn!("could not raise sensor driver thread priority, continuing at default priority");
    }
}

#[cfg(not(target_os = "linux"))]
fn request_elevated_priority() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_drops_oldest_when_full() {
        let rb: RingBuffer<i32> = RingBuffer::new(3);
        rb.push(1);
        rb.push(2);
        rb.push(3);
        rb.push(4);
        assert_eq!(rb.drain(), vec![2, 3, 4]);
    }

    #[test]
    fn ring_buffer_pop_blocking_times_out_when_empty() {
        let rb: RingBuffer<i32> = RingBuffer::new(3);
        assert_eq!(rb.pop_blocking(Duration::from_millis(10)), None);
    }

    #[test]
    fn ring_buffer_pop_blocking_returns_pushed_item() {
        let rb: RingBuffer<i32> = RingBuffer::new(3);
        rb.push(42);
        assert_eq!(rb.pop_blocking(Duration::from_millis(10)), Some(42));
    }
}
