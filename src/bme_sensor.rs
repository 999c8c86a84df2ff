// bme_sensor.rs
//
// BME280 with switched module supply, and the supply voltage ADC

use ::bme280::i2c::BME280;
use embedded_hal::{digital::OutputPin, i2c::I2c};
use esp_idf_hal::{
    adc::{
        attenuation,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
    },
    delay::Ets,
    gpio::ADCPin,
    peripheral::Peripheral,
};
use esp_idf_sys::EspError;

use crate::*;

/// BME280 whose module ground is switched by `power` (low = on).
pub struct Bme280Sensor<I, P> {
    i2c: I,
    power: P,
}

impl<I, P> Bme280Sensor<I, P>
where
    I: I2c,
    P: OutputPin,
{
    pub fn new(i2c: I, power: P) -> Self {
        Self { i2c, power }
    }
}

impl<I, P> EnvSensor for Bme280Sensor<I, P>
where
    I: I2c,
    I::Error: core::fmt::Debug,
    P: OutputPin,
{
    fn set_power(&mut self, on: bool) {
        let res = if on { self.power.set_low() } else { self.power.set_high() };
        if let Err(e) = res {
            warn!("BME280 power pin: {e:?}");
        }
    }

    fn read_at(&mut self, address: u8) -> anyhow::Result<RawReading> {
        // the module lost its state while unpowered, init on every read
        let mut bme = BME280::new(&mut self.i2c, address);
        bme.init(&mut Ets)
            .map_err(|e| anyhow!("Failed to init bme280 at 0x{address:02X}: {e:?}"))?;
        let m = bme
            .measure(&mut Ets)
            .map_err(|e| anyhow!("Failed to read bme280 sensor: {e:?}"))?;
        Ok(RawReading {
            temperature: m.temperature,
            humidity: m.humidity,
            pressure: m.pressure,
        })
    }
}

pub struct SupplyAdc<'d, T: ADCPin> {
    channel: AdcChannelDriver<'d, T, AdcDriver<'d, T::Adc>>,
}

impl<'d, T: ADCPin> SupplyAdc<'d, T> {
    pub fn new(
        adc: impl Peripheral<P = T::Adc> + 'd,
        pin: impl Peripheral<P = T> + 'd,
    ) -> Result<Self, EspError> {
        let config = AdcChannelConfig {
            attenuation: attenuation::DB_11,
            ..Default::default()
        };
        let channel = AdcChannelDriver::new(AdcDriver::new(adc)?, pin, &config)?;
        Ok(Self { channel })
    }
}

impl<T: ADCPin> AnalogInput for SupplyAdc<'_, T> {
    fn read_raw(&mut self) -> u16 {
        match self.channel.read_raw() {
            Ok(raw) => raw,
            Err(e) => {
                error!("Supply ADC read failed: {e:?}");
                0
            }
        }
    }
}

// EOF
