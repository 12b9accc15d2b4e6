//! At-rest layout of the global config record and the data records. Everything is little-endian
//! and encoded field by field, independent of the in-memory representation.

use crate::bad_blocks::{BITMAP_SIZE, BITMAP_WORDS, BadBlocks};
use alloc::vec;
use alloc::vec::Vec;

pub(crate) const DEV_EUI_SIZE: usize = 8;
pub(crate) const APP_KEY_SIZE: usize = 16;

const MODE_OFFSET: usize = 0;
const REJOIN_HOURS_OFFSET: usize = 1;
const WAKEUP_INTERVAL_OFFSET: usize = 3;
const UPLINKS_OFFSET: usize = 7;
const DEV_EUI_OFFSET: usize = 8;
const APP_KEY_OFFSET: usize = DEV_EUI_OFFSET + DEV_EUI_SIZE;
const BITMAP_OFFSET: usize = APP_KEY_OFFSET + APP_KEY_SIZE;

pub(crate) const CONFIG_RECORD_SIZE: usize = BITMAP_OFFSET + BITMAP_SIZE;
pub(crate) const WRITE_COUNT_SIZE: usize = size_of::<u32>();

const _: () = assert!(
    BITMAP_OFFSET == 32 && CONFIG_RECORD_SIZE == 64,
    "Config record layout must stay compatible with deployed devices"
);

/// Operating mode of the node. Stored as the first byte of the config page, which doubles as the
/// validity check: erased flash reads back as `Uninitialized`.
#[derive(strum::FromRepr, strum::Display, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DeviceMode {
    #[default]
    Uninitialized = 0,
    Counter = 1,
    Alarm = 2,
    Modbus = 3,
    Analog = 4,
}

impl DeviceMode {
    /// Returns the mode for a stored byte if it names a configured mode.
    pub fn from_stored(raw: u8) -> Option<DeviceMode> {
        match DeviceMode::from_repr(raw) {
            Some(DeviceMode::Uninitialized) | None => None,
            Some(mode) => Some(mode),
        }
    }
}

/// Global config record as found on flash. `device_mode` is kept raw so that corrupted content
/// can be inspected before it is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConfigRecord {
    pub(crate) device_mode: u8,
    pub(crate) rejoin_hours: u16,
    pub(crate) wakeup_interval_ms: u32,
    pub(crate) uplinks_per_transmission: u8,
    pub(crate) dev_eui: [u8; DEV_EUI_SIZE],
    pub(crate) app_key: [u8; APP_KEY_SIZE],
    pub(crate) bad_blocks: BadBlocks,
}

impl ConfigRecord {
    /// Encodes the record into a full page, zero padded behind the record.
    pub(crate) fn to_page(&self, page_size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; page_size];
        buf[MODE_OFFSET] = self.device_mode;
        buf[REJOIN_HOURS_OFFSET..WAKEUP_INTERVAL_OFFSET]
            .copy_from_slice(&self.rejoin_hours.to_le_bytes());
        buf[WAKEUP_INTERVAL_OFFSET..UPLINKS_OFFSET]
            .copy_from_slice(&self.wakeup_interval_ms.to_le_bytes());
        buf[UPLINKS_OFFSET] = self.uplinks_per_transmission;
        buf[DEV_EUI_OFFSET..APP_KEY_OFFSET].copy_from_slice(&self.dev_eui);
        buf[APP_KEY_OFFSET..BITMAP_OFFSET].copy_from_slice(&self.app_key);
        for (i, word) in self.bad_blocks.words().iter().enumerate() {
            let offset = BITMAP_OFFSET + i * size_of::<u32>();
            buf[offset..offset + size_of::<u32>()].copy_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Decodes the record from the start of a page. `buf` must hold at least
    /// `CONFIG_RECORD_SIZE` bytes, which `Layout::validate` guarantees for a page.
    pub(crate) fn from_bytes(buf: &[u8]) -> Self {
        let mut words = [0u32; BITMAP_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            *word = read_u32(buf, BITMAP_OFFSET + i * size_of::<u32>());
        }

        let mut dev_eui = [0u8; DEV_EUI_SIZE];
        dev_eui.copy_from_slice(&buf[DEV_EUI_OFFSET..APP_KEY_OFFSET]);
        let mut app_key = [0u8; APP_KEY_SIZE];
        app_key.copy_from_slice(&buf[APP_KEY_OFFSET..BITMAP_OFFSET]);

        Self {
            device_mode: buf[MODE_OFFSET],
            rejoin_hours: u16::from_le_bytes([
                buf[REJOIN_HOURS_OFFSET],
                buf[REJOIN_HOURS_OFFSET + 1],
            ]),
            wakeup_interval_ms: read_u32(buf, WAKEUP_INTERVAL_OFFSET),
            uplinks_per_transmission: buf[UPLINKS_OFFSET],
            dev_eui,
            app_key,
            bad_blocks: BadBlocks::from_words(words),
        }
    }
}

/// Newest snapshot of the application data, as stamped by the allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRecord {
    pub write_count: u32,
    pub payload: Vec<u8>,
}

impl DataRecord {
    /// Encodes counter and payload into a full page. The payload must fit behind the counter.
    pub(crate) fn encode(write_count: u32, payload: &[u8], page_size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; page_size];
        buf[..WRITE_COUNT_SIZE].copy_from_slice(&write_count.to_le_bytes());
        buf[WRITE_COUNT_SIZE..WRITE_COUNT_SIZE + payload.len()].copy_from_slice(payload);
        buf
    }

    pub(crate) fn decode(page: &[u8]) -> Self {
        Self {
            write_count: read_write_count(page),
            payload: page[WRITE_COUNT_SIZE..].to_vec(),
        }
    }
}

pub(crate) fn read_write_count(buf: &[u8]) -> u32 {
    read_u32(buf, 0)
}

#[inline(always)]
fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}
