//! Deterministic bucketing of subjects for percentage rollouts.

/// Number of buckets a subject can fall into. A rollout percentage `p` enables buckets `0..p`.
pub const TOTAL_BUCKETS: u64 = 100;

pub trait Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64;

    /// Bucket of `subject_id` for the flag `flag_key` within a named rollout.
    ///
    /// The flag key salts the hash, so the same subject buckets independently across flags. The
    /// rollout salt separates user and tenant rollouts of the same flag.
    fn get_bucket(&self, rollout_salt: &str, flag_key: &str, subject_id: &str) -> u64 {
        self.get_shard(
            format!("{rollout_salt}-{flag_key}-{subject_id}"),
            TOTAL_BUCKETS,
        )
    }
}

/// The default (and only) sharder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Sharder;

impl Sharder for Md5Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64 {
        let hash = md5::compute(input);
        let value = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
        (value as u64) % total_shards
    }
}
