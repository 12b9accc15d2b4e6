#![doc = include_str ! ("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

pub mod bad_blocks;
pub mod error;
mod internal;
pub mod layout;
pub mod platform;
mod raw;
mod settings;

pub use bad_blocks::BadBlocks;
pub use layout::{Layout, RetryPolicy, StorageConfig};
pub use raw::{DataRecord, DeviceMode};
pub use settings::{
    CONFIG_LOAD_ATTEMPTS, DEFAULT_APP_KEY, DEFAULT_DEV_EUI, DEFAULT_REJOIN_HOURS,
    DEFAULT_UPLINKS_PER_TRANSMISSION, DEFAULT_WAKEUP_INTERVAL_MS, DeviceSettings,
    MIN_REJOIN_HOURS, MIN_WAKEUP_INTERVAL_MS,
};

extern crate alloc;

use crate::error::Error;
use crate::internal::Cursor;
use crate::platform::BlockDevice;
#[cfg(feature = "defmt")]
use defmt::trace;
use embedded_hal::delay::DelayNs;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StorageStatistics {
    /// Pages marked bad anywhere on the device.
    pub bad_pages: u32,
    pub data_pages: u16,
    /// Data pages still offered by the allocator.
    pub usable_data_pages: u16,
    /// Page holding the newest data record, `None` until the recovery scan ran or right after a
    /// wipe.
    pub current_page: Option<u16>,
    pub write_count: u32,
    pub ready: bool,
}

/// The storage engine context. Owns the block device and all session state: the bad-block
/// bitmap, the live device settings and the data allocator cursor.
///
/// Nothing is read from flash on construction. The config has to be loaded explicitly with
/// [`Storage::load_config`], the data cursor is recovered lazily by the first
/// [`Storage::save_data`] or [`Storage::load_data`]. If the settings were neither loaded nor
/// edited by then, a valid stored record is taken over during that recovery, so persisting a bad
/// page or a rollover rewrites the stored settings and not the compiled-in defaults.
pub struct Storage<B: BlockDevice, D: DelayNs> {
    pub(crate) device: B,
    pub(crate) delay: D,
    pub(crate) config: StorageConfig,
    pub(crate) settings: DeviceSettings,
    /// Set once `settings` came from flash or from the caller.
    pub(crate) settings_loaded: bool,
    pub(crate) bad_blocks: BadBlocks,
    pub(crate) cursor: Cursor,
}

impl<B: BlockDevice, D: DelayNs> Storage<B, D> {
    /// Validates the layout and takes ownership of the device. `delay` is used for the settle time
    /// between writing a data page and reading it back.
    pub fn new(device: B, delay: D, config: StorageConfig) -> Result<Self, Error> {
        config.validate()?;

        #[cfg(feature = "defmt")]
        trace!("new: {}", config);

        Ok(Self {
            device,
            delay,
            config,
            settings: DeviceSettings::default(),
            settings_loaded: false,
            bad_blocks: BadBlocks::new(),
            cursor: Cursor::uninitialized(),
        })
    }

    /// Releases the device and the delay. Everything worth keeping is already on flash.
    pub fn shutdown(self) -> (B, D) {
        (self.device, self.delay)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Live settings, as written by the next [`Storage::save_config`].
    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut DeviceSettings {
        self.settings_loaded = true;
        &mut self.settings
    }

    pub fn bad_blocks(&self) -> &BadBlocks {
        &self.bad_blocks
    }

    pub fn is_bad(&self, page: u16) -> bool {
        self.bad_blocks.is_bad(page)
    }

    pub fn count_bad(&self) -> u32 {
        self.bad_blocks.count_bad()
    }

    /// Stores a new data snapshot on the next good page of the data region and verifies it.
    /// Payloads shorter than [`Layout::payload_size`] are zero padded.
    ///
    /// Returns the write counter stamped into the record.
    pub fn save_data(&mut self, payload: &[u8]) -> Result<u32, Error> {
        if payload.len() > self.config.layout.payload_size() {
            return Err(Error::PayloadTooLarge);
        }

        self.write_data(payload)
    }

    /// Returns the newest data record. Not verified: protection is only provided at write time.
    pub fn load_data(&mut self) -> Result<DataRecord, Error> {
        self.read_data()
    }

    /// Erases the whole device, including extra config pages, and rewrites the global config
    /// record from the live settings. Known bad pages stay marked, stored ones included.
    pub fn wipe(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("wipe");

        self.refresh_from_config_page();
        self.erase_and_restore(0)
    }

    /// Page holding the newest data record, if known.
    pub fn current_data_page(&self) -> Option<u16> {
        self.cursor.current_page(&self.config.layout)
    }

    pub fn write_count(&self) -> u32 {
        self.cursor.write_count
    }

    pub fn statistics(&self) -> StorageStatistics {
        let layout = &self.config.layout;
        let bad_data_pages = (layout.data_page_start..=layout.data_page_end)
            .filter(|&page| self.bad_blocks.is_bad(page))
            .count() as u16;

        StorageStatistics {
            bad_pages: self.bad_blocks.count_bad(),
            data_pages: layout.data_pages(),
            usable_data_pages: layout.data_pages() - bad_data_pages,
            current_page: self.current_data_page(),
            write_count: self.cursor.write_count,
            ready: self.cursor.is_ready(),
        }
    }
}
