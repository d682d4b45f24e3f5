/// Default number of IDs requested per block.
pub const DEFAULT_BLOCK_SIZE: u64 = 10_000;

/// Policy deciding how many IDs the next requested block should contain.
///
/// The pool consults its sizer before every renewal and forwards the answer to
/// the authority as [`BlockRequest::block_size`]. The policy is opaque to the
/// pool: any `Fn(u64) -> u64` closure works as well.
///
/// # Example
/// ```
/// use idpool::{IdBlockSizer, SimpleBlockSizer};
///
/// let fixed = SimpleBlockSizer::new(500);
/// assert_eq!(fixed.block_size(0), 500);
///
/// let doubling = |granted: u64| 100u64 << granted.min(10);
/// assert_eq!(doubling.block_size(2), 400);
/// ```
///
/// [`BlockRequest::block_size`]: crate::BlockRequest::block_size
pub trait IdBlockSizer: Send + Sync {
    /// Returns the desired size of the next block, given how many blocks the
    /// pool has been granted so far.
    fn block_size(&self, previous_blocks_granted: u64) -> u64;
}

impl<F> IdBlockSizer for F
where
    F: Fn(u64) -> u64 + Send + Sync,
{
    fn block_size(&self, previous_blocks_granted: u64) -> u64 {
        self(previous_blocks_granted)
    }
}

/// A sizer that always asks for the same number of IDs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimpleBlockSizer {
    size: u64,
}

impl SimpleBlockSizer {
    /// Creates a sizer that always requests `size` IDs.
    pub const fn new(size: u64) -> Self {
        Self { size }
    }
}

impl Default for SimpleBlockSizer {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl IdBlockSizer for SimpleBlockSizer {
    fn block_size(&self, _previous_blocks_granted: u64) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_sizer_is_constant() {
        let sizer = SimpleBlockSizer::new(42);
        assert_eq!(sizer.block_size(0), 42);
        assert_eq!(sizer.block_size(1_000), 42);
        assert_eq!(SimpleBlockSizer::default().block_size(3), DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn closures_are_sizers() {
        let sizer: &dyn IdBlockSizer = &|granted: u64| (granted + 1) * 10;
        assert_eq!(sizer.block_size(0), 10);
        assert_eq!(sizer.block_size(4), 50);
    }
}
