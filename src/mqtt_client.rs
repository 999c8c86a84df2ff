// mqtt_client.rs

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};

use esp_idf_svc::mqtt::client::{
    EspAsyncMqttClient, EspAsyncMqttConnection, EventPayload, MqttClientConfiguration, QoS,
};

use crate::*;

const CONNECT_POLL: Duration = Duration::from_millis(100);
const CONNECT_WAIT_POLLS: u32 = 1;

pub struct EspBroker {
    client: EspAsyncMqttClient,
    connected: Arc<AtomicBool>,
    inbound: mpsc::Receiver<InboundMessage>,
}

/// Drives the connection side of the client. Has to run alongside the
/// control loop.
pub struct BrokerEvents {
    conn: EspAsyncMqttConnection,
    connected: Arc<AtomicBool>,
    inbound: mpsc::Sender<InboundMessage>,
}

impl EspBroker {
    pub fn new(config: &Configuration) -> anyhow::Result<(Self, BrokerEvents)> {
        let url = config.mqtt_url();
        info!("MQTT conn: {url} [{id}]", id = config.mqtt_name);

        let (client, conn) = match EspAsyncMqttClient::new(
            &url,
            &MqttClientConfiguration {
                client_id: Some(&config.mqtt_name),
                username: Some(&config.mqtt_user).filter(|u| !u.is_empty()).map(String::as_str),
                password: Some(&config.mqtt_password)
                    .filter(|p| !p.is_empty())
                    .map(String::as_str),
                keep_alive_interval: Some(Duration::from_secs(25)),
                ..Default::default()
            },
        ) {
            Ok(c) => c,
            Err(e) => {
                let emsg = format!("MQTT conn failed: {e:?}");
                error!("{emsg}");
                bail!("{emsg}");
            }
        };

        let connected = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        Ok((
            Self {
                client,
                connected: connected.clone(),
                inbound: rx,
            },
            BrokerEvents {
                conn,
                connected,
                inbound: tx,
            },
        ))
    }
}

impl Broker for EspBroker {
    async fn connect(&mut self) -> bool {
        // esp-mqtt reconnects on its own, just give it a moment
        for _ in 0..CONNECT_WAIT_POLLS {
            if self.is_connected() {
                return true;
            }
            sleep(CONNECT_POLL).await;
        }
        self.is_connected()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn subscribe(&mut self, topic: &str) -> bool {
        match self.client.subscribe(topic, QoS::AtLeastOnce).await {
            Ok(_) => true,
            Err(e) => {
                error!("MQTT subscribe {topic} failed: {e}");
                false
            }
        }
    }

    async fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> bool {
        info!("MQTT sending {topic} {payload}");
        match self
            .client
            .publish(topic, QoS::AtLeastOnce, retain, payload.as_bytes())
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!("MQTT send error: {e}");
                false
            }
        }
    }

    fn next_inbound(&mut self) -> Option<InboundMessage> {
        self.inbound.try_recv().ok()
    }
}

impl BrokerEvents {
    #[allow(unreachable_code)]
    pub async fn run(mut self) -> anyhow::Result<()> {
        while let Ok(event) = Box::pin(self.conn.next()).await {
            match event.payload() {
                EventPayload::Connected(_) => {
                    info!("MQTT connected.");
                    self.connected.store(true, Ordering::Relaxed);
                }
                EventPayload::Disconnected => {
                    warn!("MQTT disconnected.");
                    self.connected.store(false, Ordering::Relaxed);
                }
                EventPayload::Received { topic, data, .. } => {
                    let Some(topic) = topic else {
                        continue;
                    };
                    debug!("MQTT received {topic}: {data:?}");
                    let msg = InboundMessage {
                        topic: topic.into(),
                        payload: data.to_vec(),
                    };
                    if self.inbound.send(msg).is_err() {
                        warn!("MQTT inbound queue closed");
                    }
                }
                EventPayload::Error(e) => {
                    error!("MQTT event error: {e:?}");
                }
                _ => {}
            }
        }

        error!("MQTT connection closed.");
        self.connected.store(false, Ordering::Relaxed);
        // we cannot return, otherwise tokio::select in main() will exit
        loop {
            sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }
}

// EOF
