//! Key/value cache with per-entry expiry.

pub trait CachePort: Send + Sync {
    /// Value stored under `key`, unless absent or expired.
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: String, ttl_seconds: u64);
}
