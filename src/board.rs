// board.rs

use esp_idf_hal::delay::FreeRtos;
use esp_idf_svc::wifi::{AsyncWifi, EspWifi};
use esp_idf_sys::esp;

use crate::*;

// not initialized on power-on, the checksum tells garbage from data
#[link_section = ".rtc_noinit"]
static mut RTC_BLOCK: [u8; RETAINED_SIZE] = [0; RETAINED_SIZE];

pub struct EspBoard {
    wifi: Option<AsyncWifi<EspWifi<'static>>>,
}

impl EspBoard {
    pub fn new() -> Self {
        Self { wifi: None }
    }

    /// Hands the connected WiFi to the board so it can be shut down before sleeping.
    pub fn set_wifi(&mut self, wifi: AsyncWifi<EspWifi<'static>>) {
        self.wifi = Some(wifi);
    }
}

impl Default for EspBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for EspBoard {
    fn uptime_secs(&self) -> u32 {
        let us = unsafe { esp_idf_sys::esp_timer_get_time() };
        (us / 1_000_000) as u32
    }
}

impl RetentionMemory for EspBoard {
    fn read(&mut self, buf: &mut [u8]) {
        // SAFETY: single threaded access, the block is only touched at boot and before sleep
        let block = unsafe { core::ptr::addr_of!(RTC_BLOCK).read() };
        let n = buf.len().min(RETAINED_SIZE);
        buf[..n].copy_from_slice(&block[..n]);
    }

    fn write(&mut self, data: &[u8]) -> anyhow::Result<()> {
        if data.len() != RETAINED_SIZE {
            bail!("RTC block is {RETAINED_SIZE} bytes, got {}", data.len());
        }
        let mut block = [0u8; RETAINED_SIZE];
        block.copy_from_slice(data);
        // SAFETY: see read()
        unsafe { core::ptr::addr_of_mut!(RTC_BLOCK).write(block) };
        Ok(())
    }
}

impl Radio for EspBoard {
    fn rssi(&self) -> Option<i32> {
        self.wifi.as_ref()?;
        let mut ap_info = esp_idf_sys::wifi_ap_record_t::default();
        esp!(unsafe { esp_idf_sys::esp_wifi_sta_get_ap_info(&mut ap_info) }).ok()?;
        Some(ap_info.rssi.into())
    }

    fn power_down(&mut self) {
        if let Some(mut wifi) = self.wifi.take() {
            let wifi = wifi.wifi_mut();
            if let Err(e) = wifi.disconnect() {
                warn!("WiFi disconnect failed: {e:?}");
            }
            if let Err(e) = wifi.stop() {
                warn!("WiFi stop failed: {e:?}");
            }
            info!("WiFi off.");
        }
    }
}

impl DeepSleep for EspBoard {
    fn deep_sleep(&mut self, duration_us: u64) {
        // let the log drain
        FreeRtos::delay_ms(1000);
        unsafe { esp_idf_sys::esp_deep_sleep(duration_us) };
    }
}

// EOF
