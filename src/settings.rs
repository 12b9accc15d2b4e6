//! Live device settings and their persistence in the global config record and the extra config
//! pages.

use crate::Storage;
use crate::error::Error;
use crate::platform::BlockDevice;
use crate::raw::{APP_KEY_SIZE, ConfigRecord, DEV_EUI_SIZE, DeviceMode};
use alloc::vec;
#[cfg(feature = "defmt")]
use defmt::{trace, warn};
use embedded_hal::delay::DelayNs;

/// Reads of the config page before giving up and falling back to defaults.
pub const CONFIG_LOAD_ATTEMPTS: usize = 3;

pub const MIN_REJOIN_HOURS: u16 = 1;
pub const MIN_WAKEUP_INTERVAL_MS: u32 = 60_000;

pub const DEFAULT_REJOIN_HOURS: u16 = 24;
pub const DEFAULT_WAKEUP_INTERVAL_MS: u32 = 15 * 60_000;
pub const DEFAULT_UPLINKS_PER_TRANSMISSION: u8 = 1;

/// Compiled-in DevEUI, used until a non-blank one has been stored.
pub const DEFAULT_DEV_EUI: [u8; DEV_EUI_SIZE] = [0x70, 0xB3, 0xD5, 0x7E, 0xD0, 0x00, 0x00, 0x01];

/// Compiled-in AppKey, used until a non-blank one has been stored.
pub const DEFAULT_APP_KEY: [u8; APP_KEY_SIZE] = [
    0x2B, 0x7E, 0x15, 0x16, 0x28, 0xAE, 0xD2, 0xA6, 0xAB, 0xF7, 0x15, 0x88, 0x09, 0xCF, 0x4F, 0x3C,
];

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceSettings {
    pub mode: DeviceMode,
    pub rejoin_hours: u16,
    pub wakeup_interval_ms: u32,
    pub uplinks_per_transmission: u8,
    pub dev_eui: [u8; DEV_EUI_SIZE],
    pub app_key: [u8; APP_KEY_SIZE],
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            mode: DeviceMode::Uninitialized,
            rejoin_hours: DEFAULT_REJOIN_HOURS,
            wakeup_interval_ms: DEFAULT_WAKEUP_INTERVAL_MS,
            uplinks_per_transmission: DEFAULT_UPLINKS_PER_TRANSMISSION,
            dev_eui: DEFAULT_DEV_EUI,
            app_key: DEFAULT_APP_KEY,
        }
    }
}

impl DeviceSettings {
    /// Takes over an accepted record. Values are clamped here and not on save.
    pub(crate) fn apply(&mut self, mode: DeviceMode, record: &ConfigRecord) {
        self.mode = mode;
        self.rejoin_hours = record.rejoin_hours.max(MIN_REJOIN_HOURS);
        self.wakeup_interval_ms = record.wakeup_interval_ms.max(MIN_WAKEUP_INTERVAL_MS);
        self.uplinks_per_transmission = match record.uplinks_per_transmission {
            0 => 1,
            n => n,
        };

        // Any non-zero byte adopts the whole stored array, zero bytes included.
        self.dev_eui = DEFAULT_DEV_EUI;
        for &byte in record.dev_eui.iter() {
            if byte != 0 {
                self.dev_eui = record.dev_eui;
            }
        }

        self.app_key = DEFAULT_APP_KEY;
        for &byte in record.app_key.iter() {
            if byte != 0 {
                self.app_key = record.app_key;
            }
        }
    }
}

impl<B, D> Storage<B, D>
where
    B: BlockDevice,
    D: DelayNs,
{
    /// Writes the live settings and the bad-block bitmap to the config page. Config changes are
    /// rare, so the write is not read back.
    pub fn save_config(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("save_config: {}", self.settings);

        let record = ConfigRecord {
            device_mode: self.settings.mode as u8,
            rejoin_hours: self.settings.rejoin_hours,
            wakeup_interval_ms: self.settings.wakeup_interval_ms,
            uplinks_per_transmission: self.settings.uplinks_per_transmission,
            dev_eui: self.settings.dev_eui,
            app_key: self.settings.app_key,
            bad_blocks: self.bad_blocks,
        };

        let page = record.to_page(self.config.layout.page_size);
        self.device
            .write_block(self.config.layout.config_page, &page)
            .map_err(|_| Error::FlashError)
    }

    /// Loads the settings and the bad-block bitmap from the config page.
    ///
    /// A record is only accepted if it names a known device mode. If none of the
    /// [`CONFIG_LOAD_ATTEMPTS`] reads does, the mode is reset to [`DeviceMode::Uninitialized`],
    /// the other settings are left untouched and [`Error::ConfigNotFound`] is returned.
    pub fn load_config(&mut self) -> Result<&DeviceSettings, Error> {
        let mut buf = vec![0u8; self.config.layout.page_size];

        for _attempt in 0..CONFIG_LOAD_ATTEMPTS {
            // zero is never a valid mode, so a read that silently does nothing gets rejected
            buf.fill(0);

            if self
                .device
                .read_block(self.config.layout.config_page, &mut buf)
                .is_err()
            {
                #[cfg(feature = "defmt")]
                warn!("load_config: read attempt {} failed", _attempt);
                continue;
            }

            let record = ConfigRecord::from_bytes(&buf);
            let Some(mode) = DeviceMode::from_stored(record.device_mode) else {
                #[cfg(feature = "defmt")]
                warn!(
                    "load_config: attempt {} found invalid mode {}",
                    _attempt, record.device_mode
                );

                #[cfg(feature = "debug-logs")]
                println!("settings: load_config: invalid mode {}", record.device_mode);
                continue;
            };

            self.settings.apply(mode, &record);
            self.settings_loaded = true;
            self.bad_blocks = record.bad_blocks;

            #[cfg(feature = "defmt")]
            trace!("load_config: {}", self.settings);

            return Ok(&self.settings);
        }

        self.settings.mode = DeviceMode::Uninitialized;
        Err(Error::ConfigNotFound)
    }

    /// Writes an opaque config blob to one of the pages between the config page and the data
    /// region, zero padded to a full page.
    pub fn save_extra(&mut self, page: u16, bytes: &[u8]) -> Result<(), Error> {
        self.check_extra(page, bytes.len())?;

        #[cfg(feature = "defmt")]
        trace!("save_extra: page {} [{}]", page, bytes.len());

        let mut buf = vec![0u8; self.config.layout.page_size];
        buf[..bytes.len()].copy_from_slice(bytes);
        self.device
            .write_block(page, &buf)
            .map_err(|_| Error::FlashError)
    }

    /// Fills `buf` from the start of an extra config page.
    pub fn load_extra(&mut self, page: u16, buf: &mut [u8]) -> Result<(), Error> {
        self.check_extra(page, buf.len())?;

        #[cfg(feature = "defmt")]
        trace!("load_extra: page {} [{}]", page, buf.len());

        self.device
            .read_block(page, buf)
            .map_err(|_| Error::FlashError)
    }

    fn check_extra(&self, page: u16, len: usize) -> Result<(), Error> {
        if !self.config.layout.is_extra_page(page) {
            #[cfg(feature = "defmt")]
            warn!("extra config page {} out of range", page);

            #[cfg(feature = "debug-logs")]
            println!("settings: extra config page {page} out of range");

            return Err(Error::ExtraPageOutOfRange(page));
        }

        if len > self.config.layout.page_size {
            return Err(Error::ValueTooLong);
        }

        Ok(())
    }
}
