use crate::Storage;
use crate::error::Error;
use crate::layout::Layout;
use crate::platform::BlockDevice;
use crate::raw::{ConfigRecord, DataRecord, DeviceMode, WRITE_COUNT_SIZE, read_write_count};
use alloc::vec;
#[cfg(feature = "defmt")]
use defmt::{debug, trace, warn};
use embedded_hal::delay::DelayNs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum AllocatorState {
    /// The cursor has not been recovered from flash since boot.
    Uninitialized,
    Ready,
}

/// Position of the newest data record. `current_page` may sit one below `data_page_start` after a
/// wipe, so that the next save lands on the first data page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cursor {
    pub(crate) state: AllocatorState,
    pub(crate) current_page: u16,
    pub(crate) write_count: u32,
}

impl Cursor {
    pub(crate) const fn uninitialized() -> Self {
        Self {
            state: AllocatorState::Uninitialized,
            current_page: 0,
            write_count: 0,
        }
    }

    fn ready(current_page: u16, write_count: u32) -> Self {
        Self {
            state: AllocatorState::Ready,
            current_page,
            write_count,
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.state == AllocatorState::Ready
    }

    pub(crate) fn current_page(&self, layout: &Layout) -> Option<u16> {
        (self.is_ready() && layout.is_data_page(self.current_page)).then_some(self.current_page)
    }
}

impl<B, D> Storage<B, D>
where
    B: BlockDevice,
    D: DelayNs,
{
    fn ensure_ready(&mut self) -> Result<(), Error> {
        if !self.cursor.is_ready() {
            self.recover()?;
        }
        Ok(())
    }

    /// Locates the newest data record by walking the data region until the write counter stops
    /// increasing. Everything behind that seam is left over from the previous lap.
    ///
    /// The first good page seeds the running maximum. On a blank region that is the first data
    /// page with counter 0, so the first save lands on the page after it.
    pub(crate) fn recover(&mut self) -> Result<(), Error> {
        self.refresh_from_config_page();

        let layout = self.config.layout;
        let mut buf = [0u8; WRITE_COUNT_SIZE];
        let mut newest: Option<(u16, u32)> = None;

        for page in layout.data_page_start..=layout.data_page_end {
            if self.bad_blocks.is_bad(page) {
                continue;
            }

            self.device.read_block(page, &mut buf).map_err(|_e| {
                #[cfg(feature = "defmt")]
                warn!("recover: read of page {} failed", page);
                Error::FlashError
            })?;

            let count = read_write_count(&buf);
            match newest {
                Some((_, newest_count)) if count <= newest_count => {
                    #[cfg(feature = "debug-logs")]
                    println!("internal: recover: seam at page {page} ({count} <= {newest_count})");
                    break;
                }
                _ => newest = Some((page, count)),
            }
        }

        let (newest_page, newest_count) = newest.unwrap_or((layout.data_page_start, 0));

        #[cfg(feature = "defmt")]
        debug!("recover: newest page {} with count {}", newest_page, newest_count);

        #[cfg(feature = "debug-logs")]
        println!("internal: recover: newest page {newest_page} with count {newest_count}");

        self.cursor = Cursor::ready(newest_page, newest_count);
        Ok(())
    }

    /// Re-reads the global config record. Its bitmap is added to the in-memory one unless it reads
    /// as erased flash. Settings that were neither loaded nor edited are taken over from a record
    /// with a valid mode.
    pub(crate) fn refresh_from_config_page(&mut self) {
        let mut buf = vec![0u8; self.config.layout.page_size];
        if let Err(_e) = self
            .device
            .read_block(self.config.layout.config_page, &mut buf)
        {
            #[cfg(feature = "defmt")]
            warn!("refresh_from_config_page: read failed, keeping in-memory state");
            return;
        }

        let record = ConfigRecord::from_bytes(&buf);
        if record.bad_blocks.is_erased() {
            #[cfg(feature = "debug-logs")]
            println!("internal: refresh_from_config_page: erased bitmap ignored");
        } else {
            self.bad_blocks.merge(&record.bad_blocks);
        }

        if self.settings_loaded {
            return;
        }
        if let Some(mode) = DeviceMode::from_stored(record.device_mode) {
            #[cfg(feature = "defmt")]
            debug!("refresh_from_config_page: adopting stored settings, mode {}", mode);

            self.settings.apply(mode, &record);
            self.settings_loaded = true;
        }
    }

    /// Next page after `from` that is not marked bad, wrapping at the end of the data region.
    /// Checks every data page at most once.
    fn next_good_page(&self, from: u16) -> Result<u16, Error> {
        let layout = &self.config.layout;
        let mut page = from;

        for _ in 0..layout.data_pages() {
            page = if page < layout.data_page_start || page >= layout.data_page_end {
                layout.data_page_start
            } else {
                page + 1
            };

            if !self.bad_blocks.is_bad(page) {
                return Ok(page);
            }
        }

        #[cfg(feature = "defmt")]
        warn!("next_good_page: every data page is marked bad");

        Err(Error::NoGoodPage)
    }

    pub(crate) fn write_data(&mut self, payload: &[u8]) -> Result<u32, Error> {
        self.ensure_ready()?;

        if self.cursor.write_count >= self.config.rollover_threshold() {
            #[cfg(feature = "defmt")]
            warn!(
                "write_data: write count {} reached rollover threshold",
                self.cursor.write_count
            );

            self.erase_and_restore(1)?;
        }

        let page_size = self.config.layout.page_size;
        let mut readback = vec![0u8; page_size];
        let mut page = self.cursor.current_page;
        let mut failed_attempts = 0u32;

        loop {
            page = self.next_good_page(page)?;

            // A failed attempt burns its counter value, the retry gets the next one.
            self.cursor.write_count += 1;
            let write_count = self.cursor.write_count;

            #[cfg(feature = "defmt")]
            trace!("write_data: page {} count {}", page, write_count);

            let record = DataRecord::encode(write_count, payload, page_size);
            if self.write_verified(page, &record, &mut readback) {
                self.cursor.current_page = page;
                return Ok(write_count);
            }

            #[cfg(feature = "defmt")]
            warn!("write_data: page {} failed verification, marking bad", page);

            #[cfg(feature = "debug-logs")]
            println!("internal: write_data: page {page} failed verification");

            self.bad_blocks.mark_bad(page);
            if let Err(_e) = self.save_config() {
                #[cfg(feature = "defmt")]
                warn!("write_data: persisting bad page {} failed", page);
            }

            failed_attempts += 1;
            if !self.config.retry_policy.allows(failed_attempts) {
                return Err(Error::RetriesExhausted(failed_attempts));
            }
        }
    }

    /// Writes `data` to `page`, waits for the device to settle and compares the readback.
    /// Transport errors on either side count as a mismatch.
    fn write_verified(&mut self, page: u16, data: &[u8], readback: &mut [u8]) -> bool {
        if let Err(_e) = self.device.write_block(page, data) {
            #[cfg(feature = "debug-logs")]
            println!("internal: write_verified: write to page {page} failed: {_e:?}");
        }

        self.delay.delay_us(self.config.settle_delay_us);

        // A read that silently leaves the buffer untouched must not pass as a match.
        for (dst, src) in readback.iter_mut().zip(data) {
            *dst = !*src;
        }

        match self.device.read_block(page, readback) {
            Ok(()) => readback[..] == data[..],
            Err(_e) => {
                #[cfg(feature = "debug-logs")]
                println!("internal: write_verified: readback of page {page} failed: {_e:?}");
                false
            }
        }
    }

    pub(crate) fn read_data(&mut self) -> Result<DataRecord, Error> {
        self.ensure_ready()?;

        let layout = self.config.layout;
        let Some(page) = self.cursor.current_page(&layout) else {
            // nothing written since the device was wiped
            return Ok(DataRecord {
                write_count: self.cursor.write_count,
                payload: vec![0u8; layout.payload_size()],
            });
        };

        #[cfg(feature = "defmt")]
        trace!("read_data: page {}", page);

        let mut buf = vec![0u8; layout.page_size];
        self.device
            .read_block(page, &mut buf)
            .map_err(|_| Error::FlashError)?;

        Ok(DataRecord::decode(&buf))
    }

    /// Erases the device, parks the cursor just below the data region with `write_count` and
    /// rewrites the global config record so settings and bitmap survive.
    pub(crate) fn erase_and_restore(&mut self, write_count: u32) -> Result<(), Error> {
        self.device.erase_all().map_err(|_| Error::FlashError)?;

        self.cursor = Cursor::ready(self.config.layout.data_page_start - 1, write_count);
        self.save_config()
    }
}
