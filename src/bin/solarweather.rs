// bin/solarweather.rs

#![warn(clippy::large_futures)]

#[cfg(target_os = "espidf")]
use esp_idf_hal::{
    delay::FreeRtos,
    gpio::PinDriver,
    i2c::{I2cConfig, I2cDriver},
    peripherals::Peripherals,
    reset::ResetReason,
    units::Hertz,
};
#[cfg(target_os = "espidf")]
use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs, timer::EspTaskTimerService};
#[cfg(target_os = "espidf")]
use esp_idf_sys::esp;
use solarweather::*;

/// Sleep after a failed hardware setup, the next boot tries again.
#[cfg(target_os = "espidf")]
const SETUP_FAILURE_SLEEP_SEC: u32 = 10 * 60;

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    if let Err(e) = run() {
        error!("Setup failed: {e:#}");
        EspBoard::new().deep_sleep(sleep_duration_us(SETUP_FAILURE_SLEEP_SEC));
    }

    info!("main() finished, reboot.");
    FreeRtos::delay_ms(3000);
    esp_idf_hal::reset::restart();
}

#[cfg(target_os = "espidf")]
fn run() -> anyhow::Result<()> {
    #[allow(clippy::needless_update)]
    let config = esp_idf_sys::esp_vfs_eventfd_config_t {
        max_fds: 1,
        ..Default::default()
    };
    esp! { unsafe { esp_idf_sys::esp_vfs_eventfd_register(&config) } }?;

    info!("Hello.");
    info!(
        "SolarWeather v{FW_VERSION} built {ts}, reset reason {reason:?}",
        ts = env!("BUILD_TIMESTAMP"),
        reason = ResetReason::get()
    );

    let sysloop = EspSystemEventLoop::take()?;
    let timer = EspTaskTimerService::new()?;
    let nvs_default_partition = nvs::EspDefaultNvsPartition::take()?;

    let ns = env!("CARGO_BIN_NAME");
    let mut store = match nvs::EspNvs::new(nvs_default_partition.clone(), ns, true) {
        Ok(nvs) => {
            info!("Got namespace {ns:?} from default partition");
            Some(NvsConfigStore::new(nvs))
        }
        Err(e) => {
            error!("Could not get namespace {ns}: {e:?}");
            None
        }
    };

    let config = Configuration::load_or_init(store.as_mut());
    log::set_max_level(if config.is_debug_active {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    info!("My config:\n{config:#?}");

    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;

    #[cfg(feature = "esp32c3")]
    let (power_pin, adc_pin, sda, scl) = (pins.gpio3, pins.gpio2, pins.gpio4, pins.gpio5);
    #[cfg(all(feature = "esp32", not(feature = "esp32c3")))]
    let (power_pin, adc_pin, sda, scl) = (pins.gpio4, pins.gpio34, pins.gpio21, pins.gpio22);

    let i2c = I2cDriver::new(
        peripherals.i2c0,
        sda,
        scl,
        &I2cConfig::new().baudrate(Hertz(100_000)),
    )?;
    let sensor = Bme280Sensor::new(i2c, PinDriver::output(power_pin)?);
    let adc = SupplyAdc::new(peripherals.adc1, adc_pin)?;

    let mut station: Station<_, _, _, EspBroker> = Station::new(config, EspBoard::new(), sensor, adc, None);

    // from here on every path ends in station.tick() and deep sleep
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(Box::pin(async move {
            let mut events = None;

            if station.needs_network() {
                match create_wifi(peripherals.modem, sysloop, timer, Some(nvs_default_partition)) {
                    Ok(mut wifi) => {
                        match Box::pin(connect_wifi(&mut wifi, &station.cycle.config)).await {
                            Ok(()) if station.cycle.config.is_mqtt_enabled => {
                                match EspBroker::new(&station.cycle.config) {
                                    Ok((broker, ev)) => {
                                        station.attach_broker(broker);
                                        events = Some(ev);
                                    }
                                    Err(e) => error!("MQTT client setup failed: {e:#}"),
                                }
                            }
                            Ok(()) => {}
                            Err(e) => error!("WiFi connect failed: {e:#}"),
                        }
                        station.board_mut().set_wifi(wifi);
                    }
                    Err(e) => error!("WiFi setup failed: {e:#}"),
                }
            }

            let mqtt_events = async move {
                match events {
                    Some(ev) => ev.run().await,
                    None => loop {
                        sleep(Duration::from_secs(3600)).await;
                    },
                }
            };

            let control = async {
                loop {
                    if station.tick().await == CycleState::Asleep {
                        break;
                    }
                    sleep(Duration::from_secs(1)).await;
                }
            };

            info!("Entering main loop...");
            tokio::select! {
                _ = Box::pin(control) => { error!("control loop ended."); }
                _ = Box::pin(mqtt_events) => { error!("mqtt event loop ended."); }
            };
        }));
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    println!("solarweather v{FW_VERSION} runs on ESP32 targets only");
}

// EOF
