pub mod driver;
pub mod protocol;

pub use driver::{DriverCommand, DriverRequest, RingBuffer, Sample, SensorConfig};
