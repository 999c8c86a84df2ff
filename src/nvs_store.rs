// nvs_store.rs

use esp_idf_svc::nvs::{EspNvs, NvsDefault};

use crate::*;

pub const NVS_BUF_SIZE: usize = 1024;

const CONFIG_NAME: &str = "cfg";

pub struct NvsConfigStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsConfigStore {
    pub fn new(nvs: EspNvs<NvsDefault>) -> Self {
        Self { nvs }
    }
}

impl ConfigStore for NvsConfigStore {
    fn load_text(&mut self) -> anyhow::Result<Option<String>> {
        let mut nvsbuf = [0u8; NVS_BUF_SIZE];
        info!("Reading up to {sz} bytes from nvs...", sz = NVS_BUF_SIZE);
        match self.nvs.get_raw(CONFIG_NAME, &mut nvsbuf)? {
            Some(b) => Ok(Some(String::from_utf8(b.to_vec())?)),
            None => {
                warn!("Nvs key not found");
                Ok(None)
            }
        }
    }

    fn save_text(&mut self, text: &str) -> anyhow::Result<()> {
        if text.len() > NVS_BUF_SIZE {
            bail!("Config is {} bytes, max {NVS_BUF_SIZE}", text.len());
        }
        info!("Saving {sz} bytes to nvs...", sz = text.len());
        self.nvs.set_raw(CONFIG_NAME, text.as_bytes())?;
        Ok(())
    }
}

// EOF
