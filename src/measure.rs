// measure.rs
//
// BME280 readings, supply voltage and derived values

use chrono::TimeDelta;

use crate::*;

pub const BME280_ADDR_DEFAULT: u8 = 0x77;
pub const BME280_ADDR_ALT: u8 = 0x76;

/// Settle time after switching the sensor module on.
pub const BME280_POWER_UP_MS: u64 = 100;

/// Correction for 289m above sea level.
pub const BARO_CORR_HPA: f32 = 34.5879;
/// The BME280 measures 2 degrees too high.
pub const TEMP_CORR_DEGREE: f32 = -2.0;

/// Volt per ADC count of the supply voltage divider.
pub const ANALOG_FACTOR: f32 = 0.031;

/// Current draw in mA.
pub const POWER_CONSUMPTION_ACTIVE: f64 = 70.0;
pub const POWER_CONSUMPTION_DEEP_SLEEP: f64 = 0.5;

/// Everything measured or derived during this boot. Lives in RAM only.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Measurements {
    pub temperature: f32,
    pub humidity: f32,
    /// hPa, sea level corrected
    pub pressure: f32,
    pub voltage: f32,
    /// Seconds until the next deep sleep, `None` when deep sleep is off.
    pub seconds_to_deep_sleep: Option<i64>,
    /// Uptime at which the current awake window started.
    pub awake_time_offset_sec: u32,
}

impl Measurements {
    fn clear_environment(&mut self) {
        self.temperature = 0.0;
        self.humidity = 0.0;
        self.pressure = 0.0;
    }
}

/// Consumption estimate since power-on in mAh.
pub fn power_consumption_mah(active_secs: u32, deep_sleep_secs: u32) -> f64 {
    (POWER_CONSUMPTION_ACTIVE * f64::from(active_secs)
        + POWER_CONSUMPTION_DEEP_SLEEP * f64::from(deep_sleep_secs))
        / 3600.0
}

/// `HH:MM:SS`, prefixed with `Nd ` once a day has passed.
pub fn format_interval(secs: u32) -> String {
    let t = TimeDelta::seconds(i64::from(secs));
    let days = t.num_days();
    let hours = t.num_hours() % 24;
    let minutes = t.num_minutes() % 60;
    let seconds = t.num_seconds() % 60;
    if days > 0 {
        format!("{days}d {hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

/// Switches the module off again when dropped.
struct PoweredSensor<'a, S: EnvSensor> {
    sensor: &'a mut S,
}

impl<'a, S: EnvSensor> PoweredSensor<'a, S> {
    fn on(sensor: &'a mut S) -> Self {
        sensor.set_power(true);
        Self { sensor }
    }
}

impl<S: EnvSensor> Drop for PoweredSensor<'_, S> {
    fn drop(&mut self) {
        self.sensor.set_power(false);
    }
}

pub struct SensorReader<S> {
    sensor: S,
    address: u8,
}

impl<S: EnvSensor> SensorReader<S> {
    pub fn new(mut sensor: S) -> Self {
        // off until the first read
        sensor.set_power(false);
        Self {
            sensor,
            address: BME280_ADDR_DEFAULT,
        }
    }

    /// Bus address of the last successful read.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Powers the module, reads it and powers it down again, at most once
    /// per `bme280_check_interval_sec`. Returns true when a read was due.
    pub async fn read_values(
        &mut self,
        now: u32,
        config: &Configuration,
        retained: &mut RetainedState,
        data: &mut Measurements,
    ) -> bool {
        if !seconds_elapsed_and_update(now, &mut retained.last_sensor_read_sec, config.bme280_check_interval_sec) {
            return false;
        }

        let mut powered = PoweredSensor::on(&mut self.sensor);
        sleep(Duration::from_millis(BME280_POWER_UP_MS)).await;

        let other = if self.address == BME280_ADDR_DEFAULT {
            BME280_ADDR_ALT
        } else {
            BME280_ADDR_DEFAULT
        };

        let mut reading = None;
        for address in [self.address, other] {
            match powered.sensor.read_at(address) {
                Ok(raw) => {
                    reading = Some((address, raw));
                    break;
                }
                Err(e) => debug!("BME280 at 0x{address:02X}: {e:#}"),
            }
        }
        drop(powered);

        match reading {
            Some((address, raw)) => {
                if address != self.address {
                    info!("BME280 sensor with port 0x{address:02X}!");
                    self.address = address;
                }
                data.temperature = raw.temperature + TEMP_CORR_DEGREE;
                data.humidity = raw.humidity;
                data.pressure = raw.pressure / 100.0 + BARO_CORR_HPA;
                info!(
                    "Temperature: {:.2}°C Humidity: {:.2}% Pressure: {:.2}hPa",
                    data.temperature, data.humidity, data.pressure
                );
            }
            None => {
                data.clear_environment();
                warn!("No valid BME280 sensor, check wiring!");
            }
        }
        true
    }
}

pub struct VoltageMonitor<A> {
    input: A,
}

impl<A: AnalogInput> VoltageMonitor<A> {
    pub fn new(input: A) -> Self {
        Self { input }
    }

    /// Supply voltage in Volt.
    pub fn read_voltage(&mut self) -> f32 {
        ANALOG_FACTOR * f32::from(self.input.read_raw())
    }
}

// EOF
