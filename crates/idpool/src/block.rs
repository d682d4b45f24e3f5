use core::{fmt, ops::Range};

/// An immutable, contiguous range of IDs granted by an [`IdAuthority`] in a
/// single round trip.
///
/// The block covers the half-open range `[start, start + count)`. A block with
/// `count == 0` is valid and is exhausted as soon as it is installed.
///
/// # Example
/// ```
/// use idpool::IdBlock;
///
/// let block = IdBlock::new(1000, 3);
/// assert_eq!(block.len(), 3);
/// assert_eq!(block.get(0), Some(1000));
/// assert_eq!(block.get(2), Some(1002));
/// assert_eq!(block.get(3), None);
/// ```
///
/// [`IdAuthority`]: crate::IdAuthority
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IdBlock {
    start: u64,
    count: u64,
}

impl IdBlock {
    /// Creates a block covering `[start, start + count)`.
    ///
    /// A block that would run past [`u64::MAX`] is truncated so that every
    /// position remains addressable.
    pub const fn new(start: u64, count: u64) -> Self {
        let count = if count > u64::MAX - start {
            u64::MAX - start
        } else {
            count
        };
        Self { start, count }
    }

    /// Creates a zero-length block anchored at `start`.
    pub const fn empty(start: u64) -> Self {
        Self { start, count: 0 }
    }

    /// The first ID of the block.
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// One past the last ID of the block.
    pub const fn end(&self) -> u64 {
        self.start.saturating_add(self.count)
    }

    /// Number of IDs in the block.
    pub const fn len(&self) -> u64 {
        self.count
    }

    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the ID at position `index`, or `None` when `index >= len()`.
    pub const fn get(&self, index: u64) -> Option<u64> {
        if index < self.count {
            Some(self.start + index)
        } else {
            None
        }
    }

    pub const fn range(&self) -> Range<u64> {
        self.start..self.end()
    }
}

impl fmt::Debug for IdBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdBlock[{}, {})", self.start, self.end())
    }
}

impl fmt::Display for IdBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}) ({} ids)", self.start, self.end(), self.count)
    }
}

impl IntoIterator for IdBlock {
    type Item = u64;
    type IntoIter = Range<u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.range()
    }
}

/// A half-open range of partition IDs served locally by an authority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartitionRange {
    /// First partition in the range.
    pub start: u32,
    /// One past the last partition in the range.
    pub end: u32,
}

impl PartitionRange {
    /// Creates the range `[start, end)`.
    ///
    /// # Example
    /// ```
    /// use idpool::PartitionRange;
    ///
    /// let range = PartitionRange::new(4, 8);
    /// assert!(range.contains(4));
    /// assert!(!range.contains(8));
    /// ```
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Whether `partition` falls inside the range.
    pub const fn contains(&self, partition: u32) -> bool {
        partition >= self.start && partition < self.end
    }
}
