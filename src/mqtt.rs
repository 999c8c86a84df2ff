// mqtt.rs

use crate::*;

pub const MQTT_CONNECT_ATTEMPTS: u32 = 25;
pub const MQTT_RETRY_DELAY_MS: u64 = 1000;
/// Wait after a publish round so the client can flush its queue.
pub const MQTT_PUBLISH_SETTLE_MS: u64 = 5000;
pub const MQTT_MAX_PAYLOAD: usize = 200;

pub const TOPIC_DEEP_SLEEP: &str = "DeepSleep";
pub const TOPIC_SEND_EVERY: &str = "SendEverySec";

pub const TOPIC_TEMPERATURE: &str = "BME280/Temperature";
pub const TOPIC_HUMIDITY: &str = "BME280/Humidity";
pub const TOPIC_PRESSURE: &str = "BME280/Pressure";
pub const TOPIC_VOLTAGE: &str = "Voltage";
pub const TOPIC_MAH: &str = "mAh";
pub const TOPIC_ALIVE: &str = "Alive";
pub const TOPIC_RSSI: &str = "RSSI";
pub const TOPIC_CONN_ERROR_COUNT: &str = "ConnErrorCount";
pub const TOPIC_SEND_ERROR_COUNT: &str = "SendErrorCount";

/// Snapshot of the values sent in one publish round.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Report {
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
    pub voltage: f32,
    pub consumption_mah: f64,
    pub alive_secs: u32,
    pub rssi: Option<i32>,
}

impl Report {
    /// Topic suffixes and payloads in publish order. Error counters come from
    /// `retained` as they are when the round starts.
    pub fn entries(&self, retained: &RetainedState) -> [(&'static str, String); 9] {
        [
            (TOPIC_TEMPERATURE, format!("{:.2}", self.temperature)),
            (TOPIC_HUMIDITY, format!("{:.2}", self.humidity)),
            (TOPIC_PRESSURE, format!("{:.2}", self.pressure)),
            (TOPIC_VOLTAGE, format!("{:.2}", self.voltage)),
            (TOPIC_MAH, format!("{:.2}", self.consumption_mah)),
            (TOPIC_ALIVE, format_interval(self.alive_secs)),
            (TOPIC_RSSI, self.rssi.map(|r| r.to_string()).unwrap_or_default()),
            (TOPIC_CONN_ERROR_COUNT, retained.conn_error_count.to_string()),
            (TOPIC_SEND_ERROR_COUNT, retained.send_error_count.to_string()),
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteCommand {
    DeepSleep(bool),
    SendEverySec(u32),
}

impl RemoteCommand {
    /// Decodes a message on `<prefix>/DeepSleep` or `<prefix>/SendEverySec`.
    pub fn parse(prefix: &str, msg: &InboundMessage) -> Option<Self> {
        if msg.payload.is_empty() || msg.payload.len() > MQTT_MAX_PAYLOAD {
            warn!("MQTT ignoring payload of {} bytes on {}", msg.payload.len(), msg.topic);
            return None;
        }
        let suffix = msg.topic.strip_prefix(prefix)?.strip_prefix('/')?;
        let text = std::str::from_utf8(&msg.payload).ok()?.trim();

        let value = match text.parse::<i64>() {
            Ok(v) => v,
            Err(_) => {
                warn!("MQTT ignoring non-numeric payload {text:?} on {}", msg.topic);
                return None;
            }
        };
        match suffix {
            TOPIC_DEEP_SLEEP => Some(Self::DeepSleep(value != 0)),
            TOPIC_SEND_EVERY => match u32::try_from(value) {
                Ok(secs) => Some(Self::SendEverySec(secs)),
                Err(_) => {
                    warn!("MQTT ignoring out of range interval {value}");
                    None
                }
            },
            _ => None,
        }
    }

    pub fn apply(self, config: &mut Configuration) {
        match self {
            Self::DeepSleep(on) => {
                config.is_deep_sleep_enabled = on;
                info!("DeepSleep - {}", if on { "On" } else { "Off" });
            }
            Self::SendEverySec(secs) => {
                config.mqtt_send_every_sec = secs;
                info!("SendEverySec - {secs}");
            }
        }
    }
}

fn round_due(now: u32, config: &Configuration, retained: &RetainedState) -> bool {
    retained.last_publish_sec != now && seconds_elapsed(now, retained.last_publish_sec, config.mqtt_send_every_sec)
}

/// Publish round without a broker (network down). Counts a connection error
/// once per send interval, like a failed connect would.
pub fn count_unreachable_round(now: u32, config: &Configuration, retained: &mut RetainedState) -> bool {
    if !seconds_elapsed_and_update(now, &mut retained.last_publish_sec, config.mqtt_send_every_sec) {
        return false;
    }
    retained.conn_error_count = retained.conn_error_count.saturating_add(1);
    error!("MQTT broker unreachable ({} in total)", retained.conn_error_count);
    true
}

pub struct Publisher<B> {
    broker: B,
    publish_in_progress: bool,
}

impl<B: Broker> Publisher<B> {
    pub fn new(broker: B) -> Self {
        Self {
            broker,
            publish_in_progress: false,
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Applies every remote command received since the last call.
    pub fn handle_inbound(&mut self, config: &mut Configuration) -> usize {
        let prefix = config.topic_prefix();
        let mut applied = 0;
        while let Some(msg) = self.broker.next_inbound() {
            info!("Message arrived [{}]", msg.topic);
            if let Some(cmd) = RemoteCommand::parse(&prefix, &msg) {
                cmd.apply(config);
                applied += 1;
            }
        }
        applied
    }

    /// True while a round runs, or when one is due at `now` that has not run
    /// at `now` yet.
    pub fn waiting_for_publish(&self, now: u32, config: &Configuration, retained: &RetainedState) -> bool {
        self.publish_in_progress || round_due(now, config, retained)
    }

    /// Connects and sends the report once per `mqtt_send_every_sec`.
    /// Returns true when a round was due.
    pub async fn handle_client(
        &mut self,
        now: u32,
        config: &mut Configuration,
        retained: &mut RetainedState,
        report: &Report,
    ) -> bool {
        self.handle_inbound(config);

        if self.publish_in_progress || !seconds_elapsed(now, retained.last_publish_sec, config.mqtt_send_every_sec) {
            return false;
        }
        self.publish_in_progress = true;

        if self.ensure_connected(config).await {
            info!("Attempting MQTT publishing");
            let prefix = config.topic_prefix();
            for (suffix, value) in report.entries(retained) {
                self.publish(&prefix, suffix, &value, retained).await;
            }
            retained.send_count = retained.send_count.saturating_add(1);
            info!("mqtt published");
            sleep(Duration::from_millis(MQTT_PUBLISH_SETTLE_MS)).await;
        } else {
            retained.conn_error_count = retained.conn_error_count.saturating_add(1);
            error!("MQTT connection failed ({} in total)", retained.conn_error_count);
        }

        // also on error, the next try waits a full interval
        retained.last_publish_sec = now;
        self.publish_in_progress = false;
        true
    }

    async fn ensure_connected(&mut self, config: &Configuration) -> bool {
        if self.broker.is_connected() {
            return true;
        }
        for attempt in 1..=MQTT_CONNECT_ATTEMPTS {
            info!(
                "Attempting MQTT connection {attempt}/{MQTT_CONNECT_ATTEMPTS} [{}][{}]",
                config.mqtt_name, config.mqtt_user
            );
            if self.broker.connect().await {
                info!("MQTT connected");
                self.subscribe_commands(config).await;
                return true;
            }
            if attempt < MQTT_CONNECT_ATTEMPTS {
                warn!("MQTT connect failed, try again in 1 second");
                sleep(Duration::from_millis(MQTT_RETRY_DELAY_MS)).await;
            }
        }
        false
    }

    async fn subscribe_commands(&mut self, config: &Configuration) {
        let prefix = config.topic_prefix();
        for suffix in [TOPIC_DEEP_SLEEP, TOPIC_SEND_EVERY] {
            let topic = format!("{prefix}/{suffix}");
            if !self.broker.subscribe(&topic).await {
                warn!("MQTT subscribe failed: {topic}");
            }
        }
    }

    async fn publish(&mut self, prefix: &str, suffix: &str, value: &str, retained: &mut RetainedState) -> bool {
        if value.is_empty() {
            debug!("MQTT skipping empty {suffix}");
            return false;
        }
        let topic = format!("{prefix}/{suffix}");
        info!("MQTT sending {topic} {value}");
        let ok = self.broker.publish(&topic, value, true).await;
        if !ok {
            retained.send_error_count = retained.send_error_count.saturating_add(1);
            error!("MQTT send error on {topic}");
        }
        ok
    }
}

// EOF
