// retained.rs
//
// Counters kept in RTC memory across deep sleep

use crc::{Crc, CRC_32_ISCSI};

use crate::*;

const NUM_FIELDS: usize = 10;
pub const RETAINED_SIZE: usize = NUM_FIELDS * 4;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Block persisted in retention memory.
///
/// The image is ten little-endian `u32` in field order with the checksum
/// last. It is validated against the checksum at boot and written back only
/// right before deep sleep, so updates made during an awake cycle that ends
/// in a reset are simply lost.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetainedState {
    /// Active seconds of all previous boots since power-on.
    pub active_time_sum_sec: u32,
    /// Deep sleep seconds since power-on.
    pub deep_sleep_time_sum_sec: u32,
    /// Active time sum at which the last deep sleep started.
    pub deep_sleep_start_sec: u32,

    pub last_sensor_read_sec: u32,
    pub last_publish_sec: u32,

    pub conn_error_count: u32,
    pub send_count: u32,
    pub send_error_count: u32,

    /// Part of an oversized sleep request still to be slept.
    pub deep_sleep_time_rest_sec: u32,

    pub checksum: u32,
}

impl Default for RetainedState {
    fn default() -> Self {
        let mut state = Self {
            active_time_sum_sec: 0,
            deep_sleep_time_sum_sec: 0,
            deep_sleep_start_sec: 0,
            last_sensor_read_sec: 0,
            last_publish_sec: 0,
            conn_error_count: 0,
            send_count: 0,
            send_error_count: 0,
            deep_sleep_time_rest_sec: 0,
            checksum: 0,
        };
        state.update_checksum();
        state
    }
}

impl RetainedState {
    fn fields(&self) -> [u32; NUM_FIELDS - 1] {
        [
            self.active_time_sum_sec,
            self.deep_sleep_time_sum_sec,
            self.deep_sleep_start_sec,
            self.last_sensor_read_sec,
            self.last_publish_sec,
            self.conn_error_count,
            self.send_count,
            self.send_error_count,
            self.deep_sleep_time_rest_sec,
        ]
    }

    /// CRC-32C folded over every field except the checksum, in field order.
    pub fn compute_checksum(&self) -> u32 {
        let mut digest = CASTAGNOLI.digest();
        for value in self.fields() {
            digest.update(&value.to_le_bytes());
        }
        digest.finalize()
    }

    pub fn update_checksum(&mut self) {
        self.checksum = self.compute_checksum();
    }

    pub fn is_valid(&self) -> bool {
        self.compute_checksum() == self.checksum
    }

    pub fn to_bytes(&self) -> [u8; RETAINED_SIZE] {
        let mut buf = [0u8; RETAINED_SIZE];
        let values = self.fields().into_iter().chain([self.checksum]);
        for (chunk, value) in buf.chunks_exact_mut(4).zip(values) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        buf
    }

    /// Decodes an image without validating it.
    pub fn from_bytes(buf: &[u8; RETAINED_SIZE]) -> Self {
        let mut v = [0u32; NUM_FIELDS];
        for (value, chunk) in v.iter_mut().zip(buf.chunks_exact(4)) {
            *value = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self {
            active_time_sum_sec: v[0],
            deep_sleep_time_sum_sec: v[1],
            deep_sleep_start_sec: v[2],
            last_sensor_read_sec: v[3],
            last_publish_sec: v[4],
            conn_error_count: v[5],
            send_count: v[6],
            send_error_count: v[7],
            deep_sleep_time_rest_sec: v[8],
            checksum: v[9],
        }
    }

    /// Reads the block from retention memory. Anything that fails the
    /// checksum (first power-on, corruption) yields the defaults.
    pub fn load<M: RetentionMemory + ?Sized>(memory: &mut M) -> Self {
        let mut buf = [0u8; RETAINED_SIZE];
        memory.read(&mut buf);
        let candidate = Self::from_bytes(&buf);
        if candidate.is_valid() {
            info!("RtcData read: {candidate:?}");
            candidate
        } else {
            info!("RtcData invalid (power on?)");
            Self::default()
        }
    }

    /// Seals the block with a fresh checksum and writes it out.
    pub fn persist<M: RetentionMemory + ?Sized>(&mut self, memory: &mut M) -> anyhow::Result<()> {
        self.update_checksum();
        memory.write(&self.to_bytes())
    }
}

// EOF
