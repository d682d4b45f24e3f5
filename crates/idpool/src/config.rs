use core::time::Duration;

use crate::{Error, Result};

/// Default time a caller waits for a renewal before failing.
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Default fraction of a block left unconsumed when prefetch starts.
pub const DEFAULT_RENEWAL_PERCENTAGE: f64 = 0.3;

/// Default minimum number of unconsumed IDs at which prefetch starts,
/// regardless of the block size.
pub const DEFAULT_RENEWAL_FLOOR: u64 = 100;

/// Construction parameters of a [`StandardIdPool`].
///
/// Build one with [`PoolConfig::builder`]; every constructor validates its
/// input so a `PoolConfig` is always usable.
///
/// # Example
/// ```
/// use idpool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::builder(3, 7)
///     .id_upper_bound(1 << 40)
///     .block_timeout(Duration::from_millis(500))
///     .renewal_percentage(0.2)
///     .build()
///     .unwrap();
///
/// assert_eq!(config.partition(), 3);
/// assert_eq!(config.renewal_index(10_000), 8_000);
/// assert_eq!(config.renewal_index(150), 50);
/// ```
///
/// [`StandardIdPool`]: crate::StandardIdPool
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(try_from = "PoolConfigBuilder", into = "PoolConfigBuilder")
)]
pub struct PoolConfig {
    partition: u32,
    namespace: u32,
    id_upper_bound: u64,
    block_timeout: Duration,
    renewal_percentage: f64,
    renewal_floor: u64,
}

impl PoolConfig {
    /// Starts a builder for the given partition and namespace.
    pub const fn builder(partition: u32, namespace: u32) -> PoolConfigBuilder {
        PoolConfigBuilder::new(partition, namespace)
    }

    /// Partition passed to every authority request.
    pub const fn partition(&self) -> u32 {
        self.partition
    }

    /// Namespace passed to every authority request.
    pub const fn namespace(&self) -> u32 {
        self.namespace
    }

    /// Exclusive upper bound on issued IDs, and on the number of IDs issued.
    pub const fn id_upper_bound(&self) -> u64 {
        self.id_upper_bound
    }

    /// Longest a single call waits for a block to arrive.
    pub const fn block_timeout(&self) -> Duration {
        self.block_timeout
    }

    /// Share of a block left unconsumed when prefetch of the next starts.
    pub const fn renewal_percentage(&self) -> f64 {
        self.renewal_percentage
    }

    /// Minimum number of unconsumed IDs at which prefetch starts.
    pub const fn renewal_floor(&self) -> u64 {
        self.renewal_floor
    }

    /// Offset within a block of `count` IDs at which prefetch of the next
    /// block starts.
    ///
    /// Prefetch begins once fewer than
    /// `max(renewal_floor, round(count * renewal_percentage))` IDs remain.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn renewal_index(&self, count: u64) -> u64 {
        let buffer = (count as f64 * self.renewal_percentage).round() as u64;
        count.saturating_sub(buffer.max(self.renewal_floor))
    }
}

/// Builder for [`PoolConfig`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfigBuilder {
    partition: u32,
    namespace: u32,
    id_upper_bound: u64,
    #[cfg_attr(feature = "serde", serde(with = "millis"))]
    block_timeout: Duration,
    renewal_percentage: f64,
    renewal_floor: u64,
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl PoolConfigBuilder {
    /// Starts from the defaults: no upper bound,
    /// [`DEFAULT_BLOCK_TIMEOUT`], [`DEFAULT_RENEWAL_PERCENTAGE`] and
    /// [`DEFAULT_RENEWAL_FLOOR`].
    pub const fn new(partition: u32, namespace: u32) -> Self {
        Self {
            partition,
            namespace,
            id_upper_bound: u64::MAX,
            block_timeout: DEFAULT_BLOCK_TIMEOUT,
            renewal_percentage: DEFAULT_RENEWAL_PERCENTAGE,
            renewal_floor: DEFAULT_RENEWAL_FLOOR,
        }
    }

    /// Sets the exclusive ceiling on issued IDs.
    #[must_use]
    pub const fn id_upper_bound(mut self, id_upper_bound: u64) -> Self {
        self.id_upper_bound = id_upper_bound;
        self
    }

    /// Sets how long a call waits for a block. Must be non-zero.
    #[must_use]
    pub const fn block_timeout(mut self, block_timeout: Duration) -> Self {
        self.block_timeout = block_timeout;
        self
    }

    /// Sets the prefetch threshold as a share of the block, strictly between
    /// 0 and 1.
    #[must_use]
    pub const fn renewal_percentage(mut self, renewal_percentage: f64) -> Self {
        self.renewal_percentage = renewal_percentage;
        self
    }

    /// Sets the minimum number of unconsumed IDs at which prefetch starts.
    #[must_use]
    pub const fn renewal_floor(mut self, renewal_floor: u64) -> Self {
        self.renewal_floor = renewal_floor;
        self
    }

    /// Validates the parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the upper bound or block timeout is
    /// zero, or the renewal percentage is not strictly between 0 and 1.
    pub fn build(self) -> Result<PoolConfig> {
        if self.id_upper_bound == 0 {
            return Err(Error::configuration("id upper bound must be positive"));
        }
        if self.block_timeout.is_zero() {
            return Err(Error::configuration("block timeout must be positive"));
        }
        if !(self.renewal_percentage > 0.0 && self.renewal_percentage < 1.0) {
            return Err(Error::configuration(format!(
                "renewal percentage must be in (0, 1), got {}",
                self.renewal_percentage
            )));
        }
        Ok(PoolConfig {
            partition: self.partition,
            namespace: self.namespace,
            id_upper_bound: self.id_upper_bound,
            block_timeout: self.block_timeout,
            renewal_percentage: self.renewal_percentage,
            renewal_floor: self.renewal_floor,
        })
    }
}

impl From<PoolConfig> for PoolConfigBuilder {
    fn from(config: PoolConfig) -> Self {
        Self {
            partition: config.partition,
            namespace: config.namespace,
            id_upper_bound: config.id_upper_bound,
            block_timeout: config.block_timeout,
            renewal_percentage: config.renewal_percentage,
            renewal_floor: config.renewal_floor,
        }
    }
}

impl TryFrom<PoolConfigBuilder> for PoolConfig {
    type Error = Error;

    fn try_from(builder: PoolConfigBuilder) -> Result<Self> {
        builder.build()
    }
}

#[cfg(feature = "serde")]
mod millis {
    use core::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PoolConfig::builder(1, 2).build().unwrap();
        assert_eq!(config.id_upper_bound(), u64::MAX);
        assert_eq!(config.block_timeout(), DEFAULT_BLOCK_TIMEOUT);
        assert_eq!(config.renewal_floor(), DEFAULT_RENEWAL_FLOOR);
    }

    #[test]
    fn rejects_zero_upper_bound() {
        let err = PoolConfig::builder(0, 0).id_upper_bound(0).build().unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = PoolConfig::builder(0, 0)
            .block_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn rejects_out_of_range_percentage() {
        for pct in [0.0, 1.0, -0.5, 1.5, f64::NAN] {
            let result = PoolConfig::builder(0, 0).renewal_percentage(pct).build();
            assert!(
                matches!(result, Err(Error::Configuration { .. })),
                "accepted {pct}"
            );
        }
    }

    #[test]
    fn renewal_index_respects_floor_and_percentage() {
        let config = PoolConfig::builder(0, 0)
            .renewal_percentage(0.1)
            .build()
            .unwrap();
        // 10% of 10k exceeds the floor.
        assert_eq!(config.renewal_index(10_000), 9_000);
        // The floor dominates small blocks.
        assert_eq!(config.renewal_index(200), 100);
        // Blocks smaller than the floor renew immediately.
        assert_eq!(config.renewal_index(50), 0);
        assert_eq!(config.renewal_index(0), 0);

        let no_floor = PoolConfig::builder(0, 0)
            .renewal_percentage(0.25)
            .renewal_floor(0)
            .build()
            .unwrap();
        assert_eq!(no_floor.renewal_index(8), 6);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserializes_through_validation() {
        let config: PoolConfig = serde_json::from_str(
            r#"{"partition":4,"namespace":9,"block_timeout":250,"renewal_percentage":0.5}"#,
        )
        .unwrap();
        assert_eq!(config.partition(), 4);
        assert_eq!(config.block_timeout(), Duration::from_millis(250));
        assert_eq!(config.id_upper_bound(), u64::MAX);

        let invalid = serde_json::from_str::<PoolConfig>(r#"{"id_upper_bound":0}"#);
        assert!(invalid.is_err());

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""block_timeout":250"#));
    }
}
