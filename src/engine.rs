// engine module: single-session SFTP operations and the chunk-parallel engine
pub mod host_cap;
pub mod parallel;
pub(crate) mod session;
pub mod sftp;

pub use parallel::{ParallelConfig, ParallelSftpEngine, Preset};
pub use sftp::SftpEngine;

/// Progress callback: `(bytes_done, bytes_total)`. Fired at engine-defined
/// granularity, but always at least once when a transfer completes.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Cooperative interrupt probe, polled between chunks. Returning `true`
/// aborts the transfer with `TaskAbort::Interrupted`.
pub type InterruptFn<'a> = &'a (dyn Fn() -> bool + Send + Sync);

/// I/O buffer for single-session streaming transfers.
pub(crate) const IO_BUF_SIZE: usize = 256 * 1024;

/// Decision of the smart pre-check: compare destination size against source
/// size before moving data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPlan {
    /// Destination already holds the full byte count; no transfer.
    Skip,
    /// Destination holds a prefix; transfer appends starting at this offset.
    Resume(u64),
    /// Destination missing or larger than the source; rewrite from zero.
    Overwrite,
}

pub fn plan_transfer(src_size: u64, dst_size: Option<u64>) -> TransferPlan {
    match dst_size {
        Some(existing) if existing == src_size => TransferPlan::Skip,
        Some(existing) if existing < src_size => TransferPlan::Resume(existing),
        _ => TransferPlan::Overwrite,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_sizes_skip() {
        assert_eq!(plan_transfer(10_000, Some(10_000)), TransferPlan::Skip);
    }

    #[test]
    fn smaller_destination_resumes_at_its_size() {
        assert_eq!(plan_transfer(10_000, Some(6_000)), TransferPlan::Resume(6_000));
    }

    #[test]
    fn larger_destination_overwrites() {
        assert_eq!(plan_transfer(10_000, Some(12_000)), TransferPlan::Overwrite);
    }

    #[test]
    fn missing_destination_overwrites() {
        assert_eq!(plan_transfer(10_000, None), TransferPlan::Overwrite);
    }

    #[test]
    fn zero_byte_source_with_zero_destination_skips() {
        assert_eq!(plan_transfer(0, Some(0)), TransferPlan::Skip);
    }
}
