pub(crate) const BITMAP_WORDS: usize = 8;
pub(crate) const BITMAP_SIZE: usize = BITMAP_WORDS * size_of::<u32>();

/// Number of pages the bitmap can track.
pub const MAX_PAGES: usize = BITMAP_WORDS * u32::BITS as usize;

/// One bit per page, set for pages that failed write verification. Persisted inside the global
/// config record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BadBlocks {
    words: [u32; BITMAP_WORDS],
}

impl BadBlocks {
    pub const fn new() -> Self {
        Self {
            words: [0; BITMAP_WORDS],
        }
    }

    pub const fn from_words(words: [u32; BITMAP_WORDS]) -> Self {
        Self { words }
    }

    pub const fn words(&self) -> &[u32; BITMAP_WORDS] {
        &self.words
    }

    pub fn is_bad(&self, page: u16) -> bool {
        let page = page as usize;
        if page >= MAX_PAGES {
            return false;
        }
        self.words[page / 32] & (1 << (page % 32)) != 0
    }

    /// Flips the bit of `page`. Calling it twice for the same page marks it good again, so a
    /// detected failure must be reported exactly once.
    pub fn mark_bad(&mut self, page: u16) {
        let page = page as usize;
        if page >= MAX_PAGES {
            return;
        }
        self.words[page / 32] ^= 1 << (page % 32);
    }

    pub fn count_bad(&self) -> u32 {
        self.words.iter().map(|word| word.count_ones()).sum()
    }

    /// Adds every page marked in `other`, keeping faults already known to this bitmap.
    pub fn merge(&mut self, other: &BadBlocks) {
        for (word, other) in self.words.iter_mut().zip(other.words.iter()) {
            *word |= *other;
        }
    }

    /// Every bit set, as read from a chip that was never programmed.
    pub fn is_erased(&self) -> bool {
        self.words.iter().all(|&word| word == u32::MAX)
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        (0..MAX_PAGES as u16).filter(|&page| self.is_bad(page))
    }
}
