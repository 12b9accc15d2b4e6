//! Address space and tuning knobs of the storage engine.

use crate::bad_blocks::MAX_PAGES;
use crate::error::Error;
use crate::raw::{CONFIG_RECORD_SIZE, WRITE_COUNT_SIZE};

/// 64 byte pages, the write page of common 24xx128 serial EEPROMs.
pub const DEFAULT_PAGE_SIZE: usize = 64;
/// 16 KiB device.
pub const DEFAULT_NUM_PAGES: u16 = 256;
pub const DEFAULT_CONFIG_PAGE: u16 = 0;
pub const DEFAULT_DATA_PAGE_START: u16 = 16;
pub const DEFAULT_DATA_PAGE_END: u16 = DEFAULT_NUM_PAGES - 1;

/// Typical EEPROM write cycle time.
pub const DEFAULT_SETTLE_DELAY_US: u32 = 5_000;

/// Distance to `u32::MAX` at which the write counter is rolled over by wiping the device.
pub const DEFAULT_ROLLOVER_MARGIN: u32 = 300_000;

/// Page indexed layout of the device.
///
/// ```text
/// | config_page | extra config pages ... | data_page_start ..= data_page_end | unused |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Layout {
    pub page_size: usize,
    pub num_pages: u16,
    pub config_page: u16,
    pub data_page_start: u16,
    pub data_page_end: u16,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            num_pages: DEFAULT_NUM_PAGES,
            config_page: DEFAULT_CONFIG_PAGE,
            data_page_start: DEFAULT_DATA_PAGE_START,
            data_page_end: DEFAULT_DATA_PAGE_END,
        }
    }
}

impl Layout {
    pub fn validate(&self) -> Result<(), Error> {
        if self.page_size < CONFIG_RECORD_SIZE || self.page_size <= WRITE_COUNT_SIZE {
            return Err(Error::InvalidPageSize);
        }

        if self.num_pages as usize > MAX_PAGES
            || self.config_page >= self.data_page_start
            || self.data_page_start > self.data_page_end
            || self.data_page_end >= self.num_pages
        {
            return Err(Error::InvalidLayout);
        }

        Ok(())
    }

    /// Bytes of caller payload a data record can carry.
    pub const fn payload_size(&self) -> usize {
        self.page_size - WRITE_COUNT_SIZE
    }

    pub const fn data_pages(&self) -> u16 {
        self.data_page_end - self.data_page_start + 1
    }

    pub const fn is_data_page(&self, page: u16) -> bool {
        page >= self.data_page_start && page <= self.data_page_end
    }

    pub const fn is_extra_page(&self, page: u16) -> bool {
        page > self.config_page && page < self.data_page_start
    }
}

/// What to do when a data write fails verification on page after page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RetryPolicy {
    /// Keep moving to the next good page until a write verifies.
    #[default]
    Unbounded,
    /// Give up with [`Error::RetriesExhausted`] after this many failed attempts within one save.
    Bounded(u32),
}

impl RetryPolicy {
    pub(crate) fn allows(&self, failed_attempts: u32) -> bool {
        match self {
            RetryPolicy::Unbounded => true,
            RetryPolicy::Bounded(max) => failed_attempts < *max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StorageConfig {
    pub layout: Layout,
    pub retry_policy: RetryPolicy,
    /// Busy wait after every physical data write before reading it back.
    pub settle_delay_us: u32,
    pub rollover_margin: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            layout: Layout::default(),
            retry_policy: RetryPolicy::default(),
            settle_delay_us: DEFAULT_SETTLE_DELAY_US,
            rollover_margin: DEFAULT_ROLLOVER_MARGIN,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), Error> {
        self.layout.validate()?;

        if self.rollover_margin < u32::from(self.layout.data_pages()) {
            return Err(Error::InvalidRolloverMargin);
        }

        Ok(())
    }

    /// Counter value from which the next save wipes the device first.
    pub const fn rollover_threshold(&self) -> u32 {
        u32::MAX.saturating_sub(self.rollover_margin)
    }
}
