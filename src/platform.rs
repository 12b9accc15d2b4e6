use alloc::vec;
use core::fmt::Debug;
use embedded_storage::Storage;

/// Page addressed access to the serial flash / EEPROM the node persists to.
///
/// The underlying hardware gives no reliable status for a transfer. Implementations should
/// report what they can, but the storage engine never trusts a write because it returned `Ok`:
/// data writes are read back and compared, and config reads are sanity checked.
pub trait BlockDevice {
    type Error: Debug;

    /// Fills `buf` with `buf.len()` bytes from the start of `page`.
    fn read_block(&mut self, page: u16, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Writes `data` to the start of `page`, replacing its previous content.
    fn write_block(&mut self, page: u16, data: &[u8]) -> Result<(), Self::Error>;

    /// Resets every page of the device to all zeros.
    fn erase_all(&mut self) -> Result<(), Self::Error>;
}

impl<T: BlockDevice> BlockDevice for &mut T {
    type Error = T::Error;

    fn read_block(&mut self, page: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        (*self).read_block(page, buf)
    }

    fn write_block(&mut self, page: u16, data: &[u8]) -> Result<(), Self::Error> {
        (*self).write_block(page, data)
    }

    fn erase_all(&mut self) -> Result<(), Self::Error> {
        (*self).erase_all()
    }
}

/// Failure of a [`StorageBlocks`] transfer.
#[derive(Debug, PartialEq)]
pub enum BlocksError<E> {
    /// The wrapped driver reported an error.
    Storage(E),
    /// The page lies beyond the 32 bit byte address space of the driver.
    OutOfRange,
}

/// Exposes a byte addressed [`Storage`] driver (I2C EEPROM, FRAM, ...) as a [`BlockDevice`]
/// with fixed size pages.
///
/// Usage: `StorageBlocks::new(eeprom, layout.page_size)`
pub struct StorageBlocks<S> {
    inner: S,
    page_size: usize,
}

impl<S: Storage> StorageBlocks<S> {
    pub fn new(inner: S, page_size: usize) -> Self {
        Self { inner, page_size }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Number of whole pages the wrapped driver can hold.
    pub fn pages(&self) -> usize {
        self.inner.capacity() / self.page_size
    }

    fn offset<E>(&self, page: usize) -> Result<u32, BlocksError<E>> {
        page
            .checked_mul(self.page_size)
            .and_then(|offset| u32::try_from(offset).ok())
            .ok_or(BlocksError::OutOfRange)
    }
}

impl<S> BlockDevice for StorageBlocks<S>
where
    S: Storage,
    S::Error: Debug,
{
    type Error = BlocksError<S::Error>;

    fn read_block(&mut self, page: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        let offset = self.offset(usize::from(page))?;
        self.inner.read(offset, buf).map_err(BlocksError::Storage)
    }

    fn write_block(&mut self, page: u16, data: &[u8]) -> Result<(), Self::Error> {
        let offset = self.offset(usize::from(page))?;
        self.inner.write(offset, data).map_err(BlocksError::Storage)
    }

    fn erase_all(&mut self) -> Result<(), Self::Error> {
        let zeros = vec![0u8; self.page_size];
        for page in 0..self.pages() {
            let offset = self.offset(page)?;
            self.inner
                .write(offset, &zeros)
                .map_err(BlocksError::Storage)?;
        }
        Ok(())
    }
}
