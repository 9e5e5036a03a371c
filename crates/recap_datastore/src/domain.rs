use std::{collections::BTreeMap, fmt, path::PathBuf, sync::LazyLock};

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default cache lifetime: two hours of inactivity.
pub const DEFAULT_CACHE_TTL_SECONDS: i64 = 7200;

/// Stage names beginning with this prefix mark a cache as holding
/// transcription output, which exempts it from expiry.
pub const TRANSCRIPT_STAGE_PREFIX: &str = "transcript";

static FILE_SERVICE_ID_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"drive\.google\.com/file/d/([a-zA-Z0-9_-]+)",
        r"drive\.google\.com/open\?id=([a-zA-Z0-9_-]+)",
        r"docs\.google\.com/.*?/d/([a-zA-Z0-9_-]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid file id pattern"))
    .collect()
});

/// A reference to an input asset: either a remote URL or a file the
/// requester already uploaded locally.
///
/// Local assets carry their size so that fingerprinting stays a pure
/// function of this value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetRef {
    Url(String),
    Local { path: PathBuf, size_bytes: u64 },
}

impl AssetRef {
    /// Extract a stable file-service ID from a sharing URL, if the URL
    /// matches a known pattern.
    pub fn file_service_id(url: &str) -> Option<String> {
        FILE_SERVICE_ID_REGEXES
            .iter()
            .find_map(|re| re.captures(url))
            .map(|caps| caps[1].to_string())
    }

    fn identity(&self) -> String {
        match self {
            AssetRef::Url(url) => match Self::file_service_id(url) {
                Some(id) => format!("drive:{id}"),
                None => short_hash(url, 12),
            },
            AssetRef::Local { path, size_bytes } => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("file:{name}:{size_bytes}")
            }
        }
    }
}

/// Deterministic identity of a job, derived from its input assets and
/// the requesting user. Two submissions with the same (media, slides,
/// user) triple always produce the same fingerprint, which is what
/// makes resuming a crashed job by resubmitting possible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobFingerprint(String);

impl JobFingerprint {
    pub fn compute(media: &AssetRef, slides: Option<&AssetRef>, user_id: u64) -> Self {
        let media_id = media.identity();
        let slides_id = slides.map(AssetRef::identity).unwrap_or_default();
        let content = format!("v:{media_id}|s:{slides_id}|u:{user_id}");
        JobFingerprint(short_hash(&content, 16))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn short_hash(input: &str, len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(len);
    for byte in digest {
        use fmt::Write;
        write!(hex, "{byte:02x}").expect("writing to a String cannot fail");
        if hex.len() >= len {
            break;
        }
    }
    hex.truncate(len);
    hex
}

/// One named step's cached result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: String,
    pub saved_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl StageRecord {
    pub fn completed(payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        StageRecord {
            status: "completed".into(),
            saved_at: now,
            payload,
        }
    }
}

/// One media part's summary, written independently as each part
/// completes so a crash loses at most the in-flight part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentResult {
    pub segment_number: u32,
    pub summary_text: String,
    pub start_offset_seconds: f64,
}

/// The aggregate per-fingerprint record: every stage result plus the
/// per-segment summaries, loadable in one read on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCache {
    pub fingerprint: JobFingerprint,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub stages: BTreeMap<String, StageRecord>,
    #[serde(default)]
    pub segments: BTreeMap<u32, SegmentResult>,
}

impl JobCache {
    pub fn new(fingerprint: JobFingerprint, now: DateTime<Utc>) -> Self {
        JobCache {
            fingerprint,
            created_at: now,
            updated_at: now,
            config: serde_json::Value::Null,
            stages: BTreeMap::new(),
            segments: BTreeMap::new(),
        }
    }

    /// Whether any stage holds transcription output. Transcription is
    /// the most expensive, least reproducible step, so caches holding
    /// one are exempt from expiry.
    pub fn has_transcript_stage(&self) -> bool {
        self.stages
            .keys()
            .any(|name| name.starts_with(TRANSCRIPT_STAGE_PREFIX))
    }

    /// Expiry is measured from the last write, and never applies to a
    /// cache holding a transcript stage.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        !self.has_transcript_stage() && now - self.updated_at > ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(u: &str) -> AssetRef {
        AssetRef::Url(u.to_string())
    }

    #[test]
    fn extracts_drive_file_ids() {
        let id = AssetRef::file_service_id("https://drive.google.com/file/d/aB3_x-9/view");
        assert_eq!(id.as_deref(), Some("aB3_x-9"));

        let id = AssetRef::file_service_id("https://drive.google.com/open?id=xyz123");
        assert_eq!(id.as_deref(), Some("xyz123"));

        assert_eq!(AssetRef::file_service_id("https://example.com/a.mp4"), None);
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let media = url("https://drive.google.com/file/d/abc123/view");
        let slides = url("https://drive.google.com/file/d/slides9/view");

        let a = JobFingerprint::compute(&media, Some(&slides), 42);
        let b = JobFingerprint::compute(&media, Some(&slides), 42);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
    }

    #[test]
    fn fingerprint_varies_with_each_input() {
        let media = url("https://drive.google.com/file/d/abc123/view");
        let slides = url("https://drive.google.com/file/d/slides9/view");

        let base = JobFingerprint::compute(&media, Some(&slides), 42);
        assert_ne!(base, JobFingerprint::compute(&media, Some(&slides), 43));
        assert_ne!(base, JobFingerprint::compute(&media, None, 42));
        assert_ne!(
            base,
            JobFingerprint::compute(&url("https://example.com/other.mp4"), Some(&slides), 42)
        );
    }

    #[test]
    fn sharing_url_variants_with_same_id_share_identity() {
        let a = url("https://drive.google.com/file/d/abc123/view?usp=sharing");
        let b = url("https://drive.google.com/open?id=abc123");
        assert_eq!(
            JobFingerprint::compute(&a, None, 7),
            JobFingerprint::compute(&b, None, 7)
        );
    }

    #[test]
    fn local_asset_identity_uses_name_and_size() {
        let a = AssetRef::Local {
            path: "/tmp/upload/slides.pdf".into(),
            size_bytes: 1024,
        };
        let b = AssetRef::Local {
            path: "/var/other/slides.pdf".into(),
            size_bytes: 1024,
        };
        // Same name and size resolve to the same identity regardless of
        // the directory the upload landed in.
        assert_eq!(
            JobFingerprint::compute(&url("u"), Some(&a), 1),
            JobFingerprint::compute(&url("u"), Some(&b), 1)
        );
    }

    #[test]
    fn transcript_stage_exempts_cache_from_expiry() {
        let now = Utc::now();
        let mut cache = JobCache::new(JobFingerprint::compute(&url("u"), None, 1), now);
        cache.updated_at = now - Duration::hours(5);
        assert!(cache.is_expired(now, Duration::seconds(DEFAULT_CACHE_TTL_SECONDS)));

        cache.stages.insert(
            "transcript".into(),
            StageRecord::completed(serde_json::json!({"text": "hello"}), now),
        );
        assert!(!cache.is_expired(now, Duration::seconds(DEFAULT_CACHE_TTL_SECONDS)));
    }

    #[test]
    fn fresh_cache_is_not_expired() {
        let now = Utc::now();
        let cache = JobCache::new(JobFingerprint::compute(&url("u"), None, 1), now);
        assert!(!cache.is_expired(now, Duration::seconds(DEFAULT_CACHE_TTL_SECONDS)));
    }
}
