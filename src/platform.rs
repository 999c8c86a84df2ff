// platform.rs
//
// Everything the power cycle needs from the chip, the sensor module and the
// network goes through these traits. The ESP-IDF implementations live in
// board.rs, bme_sensor.rs, nvs_store.rs and mqtt_client.rs.

/// Seconds since this boot. Restarts at zero after every deep sleep.
pub trait Clock {
    fn uptime_secs(&self) -> u32;
}

/// Memory that survives deep sleep but not a power loss.
pub trait RetentionMemory {
    fn read(&mut self, buf: &mut [u8]);
    fn write(&mut self, data: &[u8]) -> anyhow::Result<()>;
}

pub trait Radio {
    /// Signal strength of the current access point, `None` when not associated.
    fn rssi(&self) -> Option<i32>;
    fn power_down(&mut self);
}

pub trait DeepSleep {
    /// Suspends the chip. On hardware this never returns, execution resumes
    /// at the boot entry point.
    fn deep_sleep(&mut self, duration_us: u64);
}

/// Everything the power cycle needs from the chip itself.
pub trait Board: Clock + RetentionMemory + Radio + DeepSleep {}

impl<T> Board for T where T: Clock + RetentionMemory + Radio + DeepSleep {}

/// Uncorrected values as delivered by the sensor.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RawReading {
    /// degrees Celsius
    pub temperature: f32,
    /// percent
    pub humidity: f32,
    /// Pascal
    pub pressure: f32,
}

pub trait EnvSensor {
    /// Switches the sensor module supply.
    fn set_power(&mut self, on: bool);
    /// Initializes the sensor at the given bus address and takes one measurement.
    fn read_at(&mut self, address: u8) -> anyhow::Result<RawReading>;
}

pub trait AnalogInput {
    fn read_raw(&mut self) -> u16;
}

/// A message received on one of the subscribed topics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[allow(async_fn_in_trait)]
pub trait Broker {
    /// One connection attempt with the credentials the broker was built with.
    async fn connect(&mut self) -> bool;
    fn is_connected(&self) -> bool;
    async fn subscribe(&mut self, topic: &str) -> bool;
    async fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> bool;
    /// Next message received since the last call, if any.
    fn next_inbound(&mut self) -> Option<InboundMessage>;
}

/// Flash storage for the configuration text.
pub trait ConfigStore {
    fn load_text(&mut self) -> anyhow::Result<Option<String>>;
    fn save_text(&mut self, text: &str) -> anyhow::Result<()>;
}

// EOF
