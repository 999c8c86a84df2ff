// config.rs

use std::fmt;

use crate::*;

pub const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No stored configuration")]
    Missing,
    #[error("Configuration storage error: {0}")]
    Storage(String),
    #[error("Wrong option entry on line {line}: {text:?}")]
    MissingSeparator { line: usize, text: String },
    #[error("Unknown option {key:?} on line {line}")]
    UnknownKey { line: usize, key: String },
    #[error("Invalid value {value:?} for {key} on line {line}")]
    InvalidValue {
        line: usize,
        key: String,
        value: String,
    },
}

#[derive(Clone, PartialEq, Eq)]
pub struct Configuration {
    pub is_debug_active: bool,

    pub connect_wifi_ap: bool,
    pub wifi_ap: String,
    pub wifi_password: String,

    pub bme280_check_interval_sec: u32,

    pub is_deep_sleep_enabled: bool,
    /// Awake time after each wake-up before going back to sleep.
    pub active_time_sec: u32,
    pub deep_sleep_time_sec: u32,

    pub is_mqtt_enabled: bool,
    pub mqtt_name: String,
    pub mqtt_id: String,
    pub mqtt_server: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_password: String,
    pub mqtt_send_every_sec: u32,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            is_debug_active: false,

            connect_wifi_ap: true,
            wifi_ap: option_env!("WIFI_SSID").unwrap_or("internet").into(),
            wifi_password: option_env!("WIFI_PASS").unwrap_or("").into(),

            bme280_check_interval_sec: 60,

            is_deep_sleep_enabled: false,
            active_time_sec: 60,
            deep_sleep_time_sec: 900,

            is_mqtt_enabled: false,
            mqtt_name: "SolarWeather".into(),
            mqtt_id: "01".into(),
            mqtt_server: "mqtt.local".into(),
            mqtt_port: DEFAULT_MQTT_PORT,
            mqtt_user: option_env!("MQTT_USER").unwrap_or("").into(),
            mqtt_password: option_env!("MQTT_PASS").unwrap_or("").into(),
            mqtt_send_every_sec: 900,
        }
    }
}

// passwords stay out of the log
impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("is_debug_active", &self.is_debug_active)
            .field("connect_wifi_ap", &self.connect_wifi_ap)
            .field("wifi_ap", &self.wifi_ap)
            .field("wifi_password", &"***")
            .field("bme280_check_interval_sec", &self.bme280_check_interval_sec)
            .field("is_deep_sleep_enabled", &self.is_deep_sleep_enabled)
            .field("active_time_sec", &self.active_time_sec)
            .field("deep_sleep_time_sec", &self.deep_sleep_time_sec)
            .field("is_mqtt_enabled", &self.is_mqtt_enabled)
            .field("mqtt_name", &self.mqtt_name)
            .field("mqtt_id", &self.mqtt_id)
            .field("mqtt_server", &self.mqtt_server)
            .field("mqtt_port", &self.mqtt_port)
            .field("mqtt_user", &self.mqtt_user)
            .field("mqtt_password", &"***")
            .field("mqtt_send_every_sec", &self.mqtt_send_every_sec)
            .finish()
    }
}

fn parse_num<T: std::str::FromStr>(line: usize, key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        line,
        key: key.into(),
        value: value.into(),
    })
}

fn parse_flag(line: usize, key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_num::<i64>(line, key, value).map(|v| v != 0)
}

fn flag(value: bool) -> u8 {
    value.into()
}

impl Configuration {
    /// Prefix of every station topic: `<name>/<id>`.
    pub fn topic_prefix(&self) -> String {
        format!("{}/{}", self.mqtt_name, self.mqtt_id)
    }

    pub fn mqtt_url(&self) -> String {
        format!("mqtt://{}:{}", self.mqtt_server, self.mqtt_port)
    }

    /// Applies one `key=value` option. `line` is only used for error reports.
    pub fn apply_option(&mut self, line: usize, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "isDebugActive" => self.is_debug_active = parse_flag(line, key, value)?,
            "connectWifiAP" => self.connect_wifi_ap = parse_flag(line, key, value)?,
            "wifiAP" => self.wifi_ap = value.into(),
            "wifiPassword" => self.wifi_password = value.into(),
            "bme280CheckIntervalSec" => self.bme280_check_interval_sec = parse_num(line, key, value)?,
            "isDeepSleepEnabled" => self.is_deep_sleep_enabled = parse_flag(line, key, value)?,
            "activeTimeSec" => self.active_time_sec = parse_num(line, key, value)?,
            "deepSleepTimeSec" => self.deep_sleep_time_sec = parse_num(line, key, value)?,
            "isMqttEnabled" => self.is_mqtt_enabled = parse_flag(line, key, value)?,
            "mqttName" => self.mqtt_name = value.into(),
            "mqttId" => self.mqtt_id = value.into(),
            "mqttServer" => self.mqtt_server = value.into(),
            "mqttPort" => self.mqtt_port = parse_num(line, key, value)?,
            "mqttUser" => self.mqtt_user = value.into(),
            "mqttPassword" => self.mqtt_password = value.into(),
            "mqttSendEverySec" => self.mqtt_send_every_sec = parse_num(line, key, value)?,
            _ => {
                return Err(ConfigError::UnknownKey {
                    line,
                    key: key.into(),
                })
            }
        }
        Ok(())
    }

    /// Applies the options line by line and stops at the first bad line.
    /// Lines before it stay applied, so after an error the configuration is
    /// only partially updated.
    pub fn apply_text(&mut self, text: &str) -> Result<usize, ConfigError> {
        let mut applied = 0;
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let entry = raw.trim_end_matches('\r');
            let Some((key, value)) = entry.split_once('=') else {
                return Err(ConfigError::MissingSeparator {
                    line,
                    text: entry.into(),
                });
            };
            let (key, value) = (key.trim(), value.trim());
            self.apply_option(line, key, value)?;
            debug!("Load option '{key}'");
            applied += 1;
        }
        Ok(applied)
    }

    pub fn to_text(&self) -> String {
        format!(
            "isDebugActive={}\n\
             connectWifiAP={}\n\
             wifiAP={}\n\
             wifiPassword={}\n\
             bme280CheckIntervalSec={}\n\
             isDeepSleepEnabled={}\n\
             activeTimeSec={}\n\
             deepSleepTimeSec={}\n\
             isMqttEnabled={}\n\
             mqttName={}\n\
             mqttId={}\n\
             mqttServer={}\n\
             mqttPort={}\n\
             mqttUser={}\n\
             mqttPassword={}\n\
             mqttSendEverySec={}\n",
            flag(self.is_debug_active),
            flag(self.connect_wifi_ap),
            self.wifi_ap,
            self.wifi_password,
            self.bme280_check_interval_sec,
            flag(self.is_deep_sleep_enabled),
            self.active_time_sec,
            self.deep_sleep_time_sec,
            flag(self.is_mqtt_enabled),
            self.mqtt_name,
            self.mqtt_id,
            self.mqtt_server,
            self.mqtt_port,
            self.mqtt_user,
            self.mqtt_password,
            self.mqtt_send_every_sec,
        )
    }

    /// Reads the stored options on top of the defaults. Any error means the
    /// caller should keep using [`Configuration::default`].
    pub fn load<S: ConfigStore + ?Sized>(store: &mut S) -> Result<Self, ConfigError> {
        let text = store
            .load_text()
            .map_err(|e| ConfigError::Storage(format!("{e:#}")))?
            .ok_or(ConfigError::Missing)?;
        info!("Got {sz} bytes of options. Parsing config...", sz = text.len());

        let mut config = Self::default();
        let count = config.apply_text(&text)?;
        info!("Settings loaded ({count} options)");
        Ok(config)
    }

    /// Boot time load. Falls back to the defaults and writes them back on any
    /// error; without a store at all the defaults are used as they are.
    pub fn load_or_init<S: ConfigStore + ?Sized>(store: Option<&mut S>) -> Self {
        let Some(store) = store else {
            error!("No config storage, using defaults");
            return Self::default();
        };
        match Self::load(&mut *store) {
            Ok(c) => c,
            Err(e) => {
                error!("Could not read nvs config ({e}), using defaults");
                let c = Self::default();
                if c.save(store) {
                    info!("Successfully saved default config to nvs.");
                }
                c
            }
        }
    }

    pub fn save<S: ConfigStore + ?Sized>(&self, store: &mut S) -> bool {
        match store.save_text(&self.to_text()) {
            Ok(()) => {
                info!("Settings saved");
                true
            }
            Err(e) => {
                error!("Failed to write options: {e:#}");
                false
            }
        }
    }
}

// EOF
