use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;

/// Rotating per-identity credential pool for rate-limited providers.
///
/// All reads and writes go through one mutex so two concurrent jobs on
/// the same identity cannot both select, and then both exceed, the
/// same key's daily cap.
#[derive(Debug)]
pub struct KeyPool {
    config: KeyPoolConfig,
    entries: Mutex<Vec<KeyEntry>>,
}

#[derive(Debug, Clone)]
pub struct KeyPoolConfig {
    /// Successful calls allowed per key per day.
    pub daily_cap: u32,
    /// Hard cap on the number of keys in the pool.
    pub max_keys: usize,
    /// Hour of day (0-23) at which usage counts and cooldowns reset.
    pub reset_hour: u32,
    pub reset_tz: Tz,
}

impl Default for KeyPoolConfig {
    fn default() -> Self {
        KeyPoolConfig {
            daily_cap: 20,
            max_keys: 5,
            reset_hour: 15,
            reset_tz: chrono_tz::Asia::Ho_Chi_Minh,
        }
    }
}

#[derive(Debug)]
struct KeyEntry {
    key: String,
    usage_count: u32,
    cooldown_until: Option<DateTime<Utc>>,
    last_reset: DateTime<Utc>,
}

/// Snapshot of one key's state, for status display.
#[derive(Debug, Clone)]
pub struct KeyStatus {
    pub index: usize,
    pub key_tail: String,
    pub usage_count: u32,
    pub daily_cap: u32,
    pub rate_limited: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyPoolError {
    #[error("pool already holds the maximum of {0} keys")]
    Full(usize),
    #[error("key is already in the pool")]
    Duplicate,
    #[error("no key at index {0}")]
    NoSuchKey(usize),
}

impl KeyPool {
    pub fn new(config: KeyPoolConfig) -> Self {
        KeyPool {
            config,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn from_keys<I, S>(keys: I, config: KeyPoolConfig) -> Result<Self, KeyPoolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pool = KeyPool::new(config);
        for key in keys {
            pool.add_key(key.into())?;
        }
        Ok(pool)
    }

    pub fn add_key(&self, key: impl Into<String>) -> Result<(), KeyPoolError> {
        let key = key.into();
        let mut entries = self.entries.lock().expect("key pool mutex poisoned");

        if entries.len() >= self.config.max_keys {
            return Err(KeyPoolError::Full(self.config.max_keys));
        }
        if entries.iter().any(|e| e.key == key) {
            return Err(KeyPoolError::Duplicate);
        }

        entries.push(KeyEntry {
            key,
            usage_count: 0,
            cooldown_until: None,
            last_reset: Utc::now(),
        });
        Ok(())
    }

    pub fn remove_key(&self, index: usize) -> Result<(), KeyPoolError> {
        let mut entries = self.entries.lock().expect("key pool mutex poisoned");
        if index >= entries.len() {
            return Err(KeyPoolError::NoSuchKey(index));
        }
        entries.remove(index);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("key pool mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First key in pool order that is neither cooling down nor at its
    /// daily cap. `None` means exhausted: callers fall back to the
    /// secondary provider or fail the step, they do not retry blindly.
    pub fn get_available_key(&self) -> Option<String> {
        self.get_available_key_at(Utc::now())
    }

    pub(crate) fn get_available_key_at(&self, now: DateTime<Utc>) -> Option<String> {
        let boundary = self.previous_reset(now);
        let mut entries = self.entries.lock().expect("key pool mutex poisoned");

        for entry in entries.iter_mut() {
            reset_if_stale(entry, boundary, now);
            let cooling = entry.cooldown_until.is_some_and(|until| until > now);
            if !cooling && entry.usage_count < self.config.daily_cap {
                return Some(entry.key.clone());
            }
        }
        None
    }

    /// Put a key in cooldown until the next daily reset boundary. The
    /// key stays in the pool; it only stops being selected.
    pub fn mark_rate_limited(&self, key: &str) {
        self.mark_rate_limited_at(key, Utc::now())
    }

    pub(crate) fn mark_rate_limited_at(&self, key: &str, now: DateTime<Utc>) {
        let until = self.next_reset(now);
        let mut entries = self.entries.lock().expect("key pool mutex poisoned");
        if let Some(entry) = entries.iter_mut().find(|e| e.key == key) {
            entry.cooldown_until = Some(until);
            tracing::warn!(key_tail = %tail(&entry.key), %until, "Key put in cooldown");
        }
    }

    /// Count one successful remote call against a key. Never called
    /// for calls that failed before reaching the provider.
    pub fn increment_count(&self, key: &str) {
        self.increment_count_at(key, Utc::now())
    }

    pub(crate) fn increment_count_at(&self, key: &str, now: DateTime<Utc>) {
        let boundary = self.previous_reset(now);
        let mut entries = self.entries.lock().expect("key pool mutex poisoned");
        if let Some(entry) = entries.iter_mut().find(|e| e.key == key) {
            reset_if_stale(entry, boundary, now);
            entry.usage_count += 1;
        }
    }

    pub fn status(&self) -> Vec<KeyStatus> {
        self.status_at(Utc::now())
    }

    pub(crate) fn status_at(&self, now: DateTime<Utc>) -> Vec<KeyStatus> {
        let boundary = self.previous_reset(now);
        let mut entries = self.entries.lock().expect("key pool mutex poisoned");
        entries
            .iter_mut()
            .enumerate()
            .map(|(index, entry)| {
                reset_if_stale(entry, boundary, now);
                KeyStatus {
                    index,
                    key_tail: tail(&entry.key),
                    usage_count: entry.usage_count,
                    daily_cap: self.config.daily_cap,
                    rate_limited: entry.cooldown_until.is_some_and(|until| until > now),
                }
            })
            .collect()
    }

    /// Most recent reset boundary at or before `now`.
    fn previous_reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.config.reset_tz);
        let hour = self.config.reset_hour.min(23);
        let at_hour = local
            .date_naive()
            .and_hms_opt(hour, 0, 0)
            .expect("reset hour is clamped to a valid value");

        let candidate = match self.config.reset_tz.from_local_datetime(&at_hour).earliest() {
            Some(dt) => dt.with_timezone(&Utc),
            None => now,
        };

        if candidate > now {
            candidate - Duration::days(1)
        } else {
            candidate
        }
    }

    fn next_reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.previous_reset(now) + Duration::days(1)
    }
}

/// Lazily apply the daily boundary: counts and cooldowns reset the
/// first time a key is touched after the boundary passes.
fn reset_if_stale(entry: &mut KeyEntry, boundary: DateTime<Utc>, now: DateTime<Utc>) {
    if entry.last_reset < boundary {
        entry.usage_count = 0;
        entry.cooldown_until = None;
        entry.last_reset = now;
    }
}

fn tail(key: &str) -> String {
    let count = key.chars().count();
    if count <= 5 {
        "*".repeat(count)
    } else {
        let visible: String = key.chars().skip(count - 5).collect();
        format!("...{visible}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(keys: &[&str]) -> KeyPool {
        KeyPool::from_keys(keys.iter().copied(), KeyPoolConfig::default()).unwrap()
    }

    #[test]
    fn selects_keys_in_pool_order() {
        let pool = pool_with(&["key-one", "key-two"]);
        assert_eq!(pool.get_available_key().as_deref(), Some("key-one"));
    }

    #[test]
    fn rate_limited_key_is_skipped_until_reset() {
        let now = Utc::now();
        let pool = pool_with(&["key-one", "key-two"]);

        pool.mark_rate_limited_at("key-one", now);
        assert_eq!(pool.get_available_key_at(now).as_deref(), Some("key-two"));

        pool.mark_rate_limited_at("key-two", now);
        assert_eq!(pool.get_available_key_at(now), None);

        // Past the next daily boundary both keys come back.
        let tomorrow = now + Duration::days(1) + Duration::hours(1);
        assert_eq!(
            pool.get_available_key_at(tomorrow).as_deref(),
            Some("key-one")
        );
    }

    #[test]
    fn key_at_daily_cap_is_skipped() {
        let now = Utc::now();
        let config = KeyPoolConfig {
            daily_cap: 2,
            ..Default::default()
        };
        let pool = KeyPool::from_keys(["key-one", "key-two"], config).unwrap();

        pool.increment_count_at("key-one", now);
        pool.increment_count_at("key-one", now);
        assert_eq!(pool.get_available_key_at(now).as_deref(), Some("key-two"));
    }

    #[test]
    fn usage_count_resets_at_daily_boundary() {
        let now = Utc::now();
        let config = KeyPoolConfig {
            daily_cap: 1,
            ..Default::default()
        };
        let pool = KeyPool::from_keys(["key-one"], config).unwrap();

        pool.increment_count_at("key-one", now);
        assert_eq!(pool.get_available_key_at(now), None);

        let tomorrow = now + Duration::days(1) + Duration::hours(1);
        assert_eq!(
            pool.get_available_key_at(tomorrow).as_deref(),
            Some("key-one")
        );
        let status = pool.status_at(tomorrow);
        assert_eq!(status[0].usage_count, 0);
    }

    #[test]
    fn enforces_cap_and_rejects_duplicates() {
        let config = KeyPoolConfig {
            max_keys: 2,
            ..Default::default()
        };
        let pool = KeyPool::new(config);

        pool.add_key("a").unwrap();
        assert_eq!(pool.add_key("a"), Err(KeyPoolError::Duplicate));
        pool.add_key("b").unwrap();
        assert_eq!(pool.add_key("c"), Err(KeyPoolError::Full(2)));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn remove_key_by_index() {
        let pool = pool_with(&["key-one", "key-two"]);
        pool.remove_key(0).unwrap();
        assert_eq!(pool.get_available_key().as_deref(), Some("key-two"));
        assert_eq!(pool.remove_key(5), Err(KeyPoolError::NoSuchKey(5)));
    }

    #[test]
    fn status_reports_cooldown_and_counts() {
        let now = Utc::now();
        let pool = pool_with(&["key-one", "key-two"]);
        pool.increment_count_at("key-two", now);
        pool.mark_rate_limited_at("key-one", now);

        let status = pool.status_at(now);
        assert!(status[0].rate_limited);
        assert_eq!(status[0].usage_count, 0);
        assert!(!status[1].rate_limited);
        assert_eq!(status[1].usage_count, 1);
        assert_eq!(status[1].key_tail, "...y-two");
    }

    #[test]
    fn status_masks_multibyte_keys_by_character() {
        let pool = pool_with(&["khóa-bí-mật-số-một", "ab"]);
        let status = pool.status();
        assert_eq!(status[0].key_tail, "...ố-một");
        assert_eq!(status[1].key_tail, "**");
    }
}
