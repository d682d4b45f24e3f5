use std::time::Duration;

use anyhow::{anyhow, bail};
use clap::Parser;
use idpool::PoolConfig;

/// Runtime configuration for the `idpool-loadgen` binary.
///
/// Every setting can be passed as a flag or through the environment variable
/// named in its description.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "idpool-loadgen",
    version,
    about = "Drives an id pool from many tasks and verifies uniqueness"
)]
pub struct CliArgs {
    /// Number of concurrent tokio tasks drawing IDs from the pool.
    ///
    /// Environment variable: `TASKS`
    #[arg(long, env = "TASKS", default_value_t = num_cpus::get())]
    pub tasks: usize,

    /// Number of IDs each task draws before it finishes.
    ///
    /// Environment variable: `IDS_PER_TASK`
    #[arg(long, env = "IDS_PER_TASK", default_value_t = 100_000)]
    pub ids_per_task: u64,

    /// Partition the pool allocates for.
    ///
    /// Environment variable: `PARTITION`
    #[arg(long, env = "PARTITION", default_value_t = 0)]
    pub partition: u32,

    /// Namespace the pool allocates for.
    ///
    /// Environment variable: `NAMESPACE`
    #[arg(long, env = "NAMESPACE", default_value_t = 0)]
    pub namespace: u32,

    /// Exclusive ceiling on issued IDs. Once reached the pool reports
    /// exhaustion and the tasks stop early.
    ///
    /// Environment variable: `ID_UPPER_BOUND`
    #[arg(long, env = "ID_UPPER_BOUND", default_value_t = u64::MAX)]
    pub id_upper_bound: u64,

    /// Number of IDs requested per block.
    ///
    /// Environment variable: `BLOCK_SIZE`
    #[arg(long, env = "BLOCK_SIZE", default_value_t = idpool::DEFAULT_BLOCK_SIZE)]
    pub block_size: u64,

    /// Share of a block left unconsumed when the next block is requested.
    ///
    /// Environment variable: `RENEWAL_PERCENTAGE`
    #[arg(long, env = "RENEWAL_PERCENTAGE", default_value_t = idpool::DEFAULT_RENEWAL_PERCENTAGE)]
    pub renewal_percentage: f64,

    /// Minimum number of IDs left unconsumed when the next block is
    /// requested.
    ///
    /// Environment variable: `RENEWAL_FLOOR`
    #[arg(long, env = "RENEWAL_FLOOR", default_value_t = idpool::DEFAULT_RENEWAL_FLOOR)]
    pub renewal_floor: u64,

    /// How long a caller waits for a block, in milliseconds.
    ///
    /// Environment variable: `BLOCK_TIMEOUT_MS`
    #[arg(long, env = "BLOCK_TIMEOUT_MS", default_value_t = 2_000)]
    pub block_timeout_ms: u64,

    /// Simulated latency of every authority call, in milliseconds.
    ///
    /// Environment variable: `AUTHORITY_LATENCY_MS`
    #[arg(long, env = "AUTHORITY_LATENCY_MS", default_value_t = 0)]
    pub authority_latency_ms: u64,

    /// Total number of IDs the authority can grant for the namespace.
    ///
    /// Environment variable: `AUTHORITY_CAPACITY`
    #[arg(long, env = "AUTHORITY_CAPACITY", default_value_t = u64::MAX)]
    pub authority_capacity: u64,

    /// Consecutive retryable failures a task tolerates before giving up.
    ///
    /// Environment variable: `MAX_RETRIES`
    #[arg(long, env = "MAX_RETRIES", default_value_t = 10)]
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct LoadgenConfig {
    pub tasks: usize,
    pub ids_per_task: u64,
    pub total_ids: u64,
    pub block_size: u64,
    pub authority_latency: Duration,
    pub authority_capacity: u64,
    pub max_retries: u32,
    pub pool: PoolConfig,
}

impl TryFrom<CliArgs> for LoadgenConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.tasks == 0 {
            bail!("TASKS must be greater than 0");
        }

        if args.ids_per_task == 0 {
            bail!("IDS_PER_TASK must be greater than 0");
        }

        if args.block_size == 0 {
            bail!("BLOCK_SIZE must be greater than 0");
        }

        let total_ids = (args.tasks as u64)
            .checked_mul(args.ids_per_task)
            .ok_or_else(|| anyhow!("Overflow in total id computation"))?;

        let pool = PoolConfig::builder(args.partition, args.namespace)
            .id_upper_bound(args.id_upper_bound)
            .block_timeout(Duration::from_millis(args.block_timeout_ms))
            .renewal_percentage(args.renewal_percentage)
            .renewal_floor(args.renewal_floor)
            .build()?;

        Ok(Self {
            tasks: args.tasks,
            ids_per_task: args.ids_per_task,
            total_ids,
            block_size: args.block_size,
            authority_latency: Duration::from_millis(args.authority_latency_ms),
            authority_capacity: args.authority_capacity,
            max_retries: args.max_retries,
            pool,
        })
    }
}
