// testutil.rs

use std::{cell::Cell, collections::VecDeque};

use crate::*;

#[derive(Default)]
pub struct MemBlock {
    pub data: Vec<u8>,
    pub fail_write: bool,
}

impl RetentionMemory for MemBlock {
    fn read(&mut self, buf: &mut [u8]) {
        let n = buf.len().min(self.data.len());
        buf[..n].copy_from_slice(&self.data[..n]);
    }

    fn write(&mut self, data: &[u8]) -> anyhow::Result<()> {
        if self.fail_write {
            bail!("retention write failed");
        }
        self.data = data.to_vec();
        Ok(())
    }
}

pub struct FakeBoard {
    pub uptime: Cell<u32>,
    pub mem: MemBlock,
    pub fail_write: bool,
    pub rssi: Option<i32>,
    pub radio_off: bool,
    pub slept_us: Vec<u64>,
}

impl FakeBoard {
    pub fn at(uptime: u32) -> Self {
        Self {
            uptime: Cell::new(uptime),
            mem: MemBlock::default(),
            fail_write: false,
            rssi: Some(-70),
            radio_off: false,
            slept_us: Vec::new(),
        }
    }
}

impl Clock for FakeBoard {
    fn uptime_secs(&self) -> u32 {
        self.uptime.get()
    }
}

impl RetentionMemory for FakeBoard {
    fn read(&mut self, buf: &mut [u8]) {
        self.mem.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.mem.fail_write = self.fail_write;
        self.mem.write(data)
    }
}

impl Radio for FakeBoard {
    fn rssi(&self) -> Option<i32> {
        self.rssi
    }

    fn power_down(&mut self) {
        self.radio_off = true;
    }
}

impl DeepSleep for FakeBoard {
    fn deep_sleep(&mut self, duration_us: u64) {
        self.slept_us.push(duration_us);
    }
}

/// Answers only at `address`.
pub struct FakeSensor {
    pub address: Option<u8>,
    pub powered: bool,
    pub power_cycles: u32,
    pub tried: Vec<u8>,
    pub reads: u32,
}

impl FakeSensor {
    pub fn working(address: u8) -> Self {
        Self {
            address: Some(address),
            powered: false,
            power_cycles: 0,
            tried: Vec::new(),
            reads: 0,
        }
    }

    pub fn broken() -> Self {
        Self {
            address: None,
            ..Self::working(0)
        }
    }
}

impl EnvSensor for FakeSensor {
    fn set_power(&mut self, on: bool) {
        if on && !self.powered {
            self.power_cycles += 1;
        }
        self.powered = on;
    }

    fn read_at(&mut self, address: u8) -> anyhow::Result<RawReading> {
        self.tried.push(address);
        if !self.powered {
            bail!("sensor not powered");
        }
        if self.address != Some(address) {
            bail!("no answer at 0x{address:02X}");
        }
        self.reads += 1;
        Ok(RawReading {
            temperature: 21.5,
            humidity: 55.0,
            pressure: 100_000.0,
        })
    }
}

pub struct FakeAdc(pub u16);

impl AnalogInput for FakeAdc {
    fn read_raw(&mut self) -> u16 {
        self.0
    }
}

pub struct FakeBroker {
    pub connected: bool,
    /// Attempt on which `connect` succeeds, `None` for never.
    pub connect_on: Option<u32>,
    pub connect_calls: u32,
    pub subscribed: Vec<String>,
    pub sent: Vec<(String, String)>,
    pub all_retained: bool,
    pub failing_topic: Option<String>,
    pub inbound: VecDeque<InboundMessage>,
}

impl FakeBroker {
    pub fn online() -> Self {
        Self {
            connected: true,
            connect_on: Some(1),
            connect_calls: 0,
            subscribed: Vec::new(),
            sent: Vec::new(),
            all_retained: true,
            failing_topic: None,
            inbound: VecDeque::new(),
        }
    }

    pub fn offline(connect_on: Option<u32>) -> Self {
        Self {
            connected: false,
            connect_on,
            ..Self::online()
        }
    }
}

impl Broker for FakeBroker {
    async fn connect(&mut self) -> bool {
        self.connect_calls += 1;
        self.connected = self.connect_on.is_some_and(|n| self.connect_calls >= n);
        self.connected
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn subscribe(&mut self, topic: &str) -> bool {
        self.subscribed.push(topic.into());
        true
    }

    async fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> bool {
        if self.failing_topic.as_deref() == Some(topic) {
            return false;
        }
        self.all_retained &= retain;
        self.sent.push((topic.into(), payload.into()));
        true
    }

    fn next_inbound(&mut self) -> Option<InboundMessage> {
        self.inbound.pop_front()
    }
}

#[derive(Default)]
pub struct MemConfigStore {
    pub text: Option<String>,
    pub fail: bool,
}

impl ConfigStore for MemConfigStore {
    fn load_text(&mut self) -> anyhow::Result<Option<String>> {
        if self.fail {
            bail!("flash read failed");
        }
        Ok(self.text.clone())
    }

    fn save_text(&mut self, text: &str) -> anyhow::Result<()> {
        if self.fail {
            bail!("flash write failed");
        }
        self.text = Some(text.into());
        Ok(())
    }
}
// EOF
