#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_hal::delay::DelayNs;
use node_storage::platform::BlockDevice;
use node_storage::{Layout, StorageConfig};
use std::collections::BTreeSet;

pub const PAGE_SIZE: usize = 64;
pub const NUM_PAGES: u16 = 32;
pub const CONFIG_PAGE: u16 = 0;
pub const DATA_PAGE_START: u16 = 4;
pub const DATA_PAGE_END: u16 = 15;

/// A small device: config page 0, extra config pages 1..=3, data pages 4..=15.
pub fn config() -> StorageConfig {
    StorageConfig {
        layout: Layout {
            page_size: PAGE_SIZE,
            num_pages: NUM_PAGES,
            config_page: CONFIG_PAGE,
            data_page_start: DATA_PAGE_START,
            data_page_end: DATA_PAGE_END,
        },
        ..StorageConfig::default()
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { page: u16, len: usize },
    Write { page: u16, len: usize },
    EraseAll,
}

/// Zero-filled in-memory device. Pages listed in `corrupt_pages` flip the first byte of every
/// write, pages in `dead_pages` ignore writes entirely.
#[derive(Default)]
pub struct Flash {
    pub buf: Vec<u8>,
    pub operations: Vec<Operation>,
    pub corrupt_pages: BTreeSet<u16>,
    pub dead_pages: BTreeSet<u16>,
    pub fail_reads: bool,
    pub fail_writes: bool,
}

impl Flash {
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; PAGE_SIZE * NUM_PAGES as usize],
            ..Default::default()
        }
    }

    pub fn page(&self, page: u16) -> &[u8] {
        let offset = page as usize * PAGE_SIZE;
        &self.buf[offset..offset + PAGE_SIZE]
    }

    pub fn page_mut(&mut self, page: u16) -> &mut [u8] {
        let offset = page as usize * PAGE_SIZE;
        &mut self.buf[offset..offset + PAGE_SIZE]
    }

    pub fn write_count_at(&self, page: u16) -> u32 {
        u32::from_le_bytes(self.page(page)[..4].try_into().unwrap())
    }

    /// Puts a data record with `write_count` on `page` behind the storage engine's back.
    pub fn stamp(&mut self, page: u16, write_count: u32, fill: u8) {
        let raw = self.page_mut(page);
        raw.fill(fill);
        raw[..4].copy_from_slice(&write_count.to_le_bytes());
    }

    pub fn writes_to(&self, page: u16) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Write { page: p, .. } if *p == page))
            .count()
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::EraseAll))
            .count()
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }
}

#[derive(Debug)]
pub struct FlashError;

impl BlockDevice for Flash {
    type Error = FlashError;

    fn read_block(&mut self, page: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        assert!(buf.len() <= PAGE_SIZE);
        println!("    flash: read:  page {page:>2}[{}]", buf.len());

        self.operations.push(Operation::Read {
            page,
            len: buf.len(),
        });
        if self.fail_reads {
            println!("    flash: FAULT");
            return Err(FlashError);
        }

        let offset = page as usize * PAGE_SIZE;
        buf.copy_from_slice(&self.buf[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_block(&mut self, page: u16, data: &[u8]) -> Result<(), Self::Error> {
        assert!(data.len() <= PAGE_SIZE);
        println!("    flash: write: page {page:>2}[{}]", data.len());

        self.operations.push(Operation::Write {
            page,
            len: data.len(),
        });
        if self.fail_writes {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        if self.dead_pages.contains(&page) {
            return Ok(());
        }

        let offset = page as usize * PAGE_SIZE;
        self.buf[offset..offset + data.len()].copy_from_slice(data);
        if self.corrupt_pages.contains(&page) {
            self.buf[offset] ^= 0xFF;
        }
        Ok(())
    }

    fn erase_all(&mut self) -> Result<(), Self::Error> {
        println!("    flash: erase all");
        self.operations.push(Operation::EraseAll);
        self.buf.fill(0);
        Ok(())
    }
}

/// Counts requested delays instead of sleeping.
#[derive(Default)]
pub struct Delay {
    pub total_us: u64,
}

impl DelayNs for Delay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_us += ns as u64 / 1_000;
    }

    fn delay_us(&mut self, us: u32) {
        self.total_us += us as u64;
    }
}

/// Global config record as placed on the config page by a previous firmware run.
pub struct StoredConfig {
    pub mode: u8,
    pub rejoin_hours: u16,
    pub wakeup_interval_ms: u32,
    pub uplinks_per_transmission: u8,
    pub dev_eui: [u8; 8],
    pub app_key: [u8; 16],
    pub bad_pages: Vec<u16>,
}

impl Default for StoredConfig {
    fn default() -> Self {
        Self {
            mode: 1,
            rejoin_hours: 12,
            wakeup_interval_ms: 300_000,
            uplinks_per_transmission: 2,
            dev_eui: [0u8; 8],
            app_key: [0u8; 16],
            bad_pages: vec![],
        }
    }
}

impl StoredConfig {
    pub fn store(&self, flash: &mut Flash) {
        let raw = flash.page_mut(CONFIG_PAGE);
        raw.fill(0);
        raw[0] = self.mode;
        raw[1..3].copy_from_slice(&self.rejoin_hours.to_le_bytes());
        raw[3..7].copy_from_slice(&self.wakeup_interval_ms.to_le_bytes());
        raw[7] = self.uplinks_per_transmission;
        raw[8..16].copy_from_slice(&self.dev_eui);
        raw[16..32].copy_from_slice(&self.app_key);
        for &page in &self.bad_pages {
            let byte = 32 + (page as usize / 32) * 4 + (page as usize % 32) / 8;
            raw[byte] |= 1 << (page % 8);
        }
    }
}

/// Whether the bitmap on the config page marks `page` bad.
pub fn stored_bad(flash: &Flash, page: u16) -> bool {
    let byte = 32 + (page as usize / 32) * 4 + (page as usize % 32) / 8;
    flash.page(CONFIG_PAGE)[byte] & (1 << (page % 8)) != 0
}
