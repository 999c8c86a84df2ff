// wifi.rs

use embedded_svc::wifi::{self, AuthMethod, ClientConfiguration};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    nvs::EspDefaultNvsPartition,
    timer::EspTaskTimerService,
    wifi::{AsyncWifi, EspWifi},
};

use crate::*;

const WIFI_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub fn create_wifi(
    modem: Modem,
    sysloop: EspSystemEventLoop,
    timer: EspTaskTimerService,
    nvs: Option<EspDefaultNvsPartition>,
) -> anyhow::Result<AsyncWifi<EspWifi<'static>>> {
    let esp_wifi = EspWifi::new(modem, sysloop.clone(), nvs)?;
    Ok(AsyncWifi::wrap(esp_wifi, sysloop, timer)?)
}

/// Joins the configured access point and waits for an address.
pub async fn connect_wifi(wifi: &mut AsyncWifi<EspWifi<'static>>, config: &Configuration) -> anyhow::Result<()> {
    let auth_method = if config.wifi_password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };

    wifi.set_configuration(&wifi::Configuration::Client(ClientConfiguration {
        ssid: config
            .wifi_ap
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("WiFi ssid too long"))?,
        password: config
            .wifi_password
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("WiFi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    info!("WiFi connecting to {ssid}...", ssid = config.wifi_ap);
    timeout(WIFI_CONNECT_TIMEOUT, async {
        wifi.start().await?;
        wifi.connect().await?;
        wifi.wait_netif_up().await?;
        Ok::<(), anyhow::Error>(())
    })
    .await
    .map_err(|_| anyhow!("WiFi connect timed out"))??;

    let ip_info = wifi.wifi().sta_netif().get_ip_info()?;
    info!("WiFi connected, IP {}", ip_info.ip);
    Ok(())
}

// EOF
