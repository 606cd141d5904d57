pub mod reading;
pub mod sensor;

pub use reading::{Aqi, RawReading, Reading, SERIES_COLUMNS, TIMESTAMP_FIELD};
pub use sensor::{Placement, RegistryError, Sensor, SensorRegistry};
