use thiserror::Error;

/// Errors returned by the storage engine. Marked as non-exhaustive to allow for future additions
/// without breaking the API. Most callers only need to distinguish `ConfigNotFound` (first boot,
/// use defaults) from the rest.
#[derive(Error, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The page size has to hold the global config record and a data record with at least one
    /// payload byte.
    #[error("invalid page size")]
    InvalidPageSize,

    /// The config page, extra config region and data region have to be ordered, non-empty and
    /// inside the device. At most 256 pages are supported by the bad-block bitmap.
    #[error("invalid layout")]
    InvalidLayout,

    /// The rollover margin has to leave room for one counter value per data page, the most a
    /// single save can consume while retrying.
    #[error("rollover margin smaller than the data region")]
    InvalidRolloverMargin,

    /// The block device reported a transport failure on a path where it can't be masked by
    /// read-after-write verification.
    #[error("internal flash error")]
    FlashError,

    /// The data payload is larger than a page minus the write counter.
    #[error("payload too large")]
    PayloadTooLarge,

    /// An extra config buffer is larger than a page.
    #[error("value too long")]
    ValueTooLong,

    /// Extra config pages live strictly between the config page and the data region.
    #[error("extra config page {0} out of range")]
    ExtraPageOutOfRange(u16),

    /// No read of the config page yielded a known device mode. Either the flash was never
    /// written or it is corrupted; the caller should fall back to defaults.
    #[error("config not found")]
    ConfigNotFound,

    /// Every page of the data region is marked bad.
    #[error("no good page left")]
    NoGoodPage,

    /// A bounded retry policy gave up after this many failed write attempts.
    #[error("write retries exhausted after {0} attempts")]
    RetriesExhausted(u32),
}
