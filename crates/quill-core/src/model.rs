//! Comment records, their identifiers, and the subject they belong to.
//!
//! Records are persisted in the same JSON shape the legacy browser widget
//! used (`id`, `name`, `text`, `ts`, `clientId`), so lists cached before the
//! engine existed load unchanged.
//!
//! # Invariants
//!
//! - Within one subject's list no two records share an `id`.
//! - Pending ids carry the [`PENDING_PREFIX`] and are never handed out by the
//!   server. A pending record is matched to its server twin by the id the
//!   create call returned when known, else by signature.
//! - Storage order is newest-first by position; presentation order is by
//!   timestamp descending ([`sort_newest_first`]).

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Author label used when a comment has no name attached.
pub const ANONYMOUS_LABEL: &str = "Anonymous";

/// Prefix marking client-generated ids.
pub const PENDING_PREFIX: &str = "pending-";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier of a comment, either server-assigned or local-pending.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(String);

impl CommentId {
    /// Wrap an identifier as received from the server or from storage.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Build a pending id from the submission time and a random nonce.
    #[must_use]
    pub fn pending(now_ms: i64, nonce: u64) -> Self {
        Self(format!("{PENDING_PREFIX}{now_ms:x}-{nonce:016x}"))
    }

    /// Whether this id was generated locally for an unconfirmed comment.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.0.starts_with(PENDING_PREFIX)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommentId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Canonical key of the discussion subject (a post) a list is scoped to.
///
/// Callers pick one key per subject and keep it for the subject's lifetime;
/// [`SubjectKey::for_post`] prefers the post id over the slug so the same
/// post never ends up cached under two keys once its id is known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectKey(String);

impl SubjectKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Derive the key for a post: `post-{id}`, or `slug-{slug}` when the id
    /// is unknown. Blank inputs are ignored.
    #[must_use]
    pub fn for_post(post_id: Option<&str>, slug: Option<&str>) -> Option<Self> {
        fn clean(value: Option<&str>) -> Option<&str> {
            value.map(str::trim).filter(|v| !v.is_empty())
        }

        if let Some(id) = clean(post_id) {
            return Some(Self(format!("post-{id}")));
        }
        clean(slug).map(|slug| Self(format!("slug-{slug}")))
    }

    /// The post id encoded in a `post-` key.
    #[must_use]
    pub fn post_id(&self) -> Option<&str> {
        self.0.strip_prefix("post-")
    }

    /// The slug encoded in a `slug-` key.
    #[must_use]
    pub fn slug(&self) -> Option<&str> {
        self.0.strip_prefix("slug-")
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// CommentRecord
// ---------------------------------------------------------------------------

fn default_author_label() -> String {
    ANONYMOUS_LABEL.to_string()
}

/// One comment as held in local state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: CommentId,
    /// Display name of the author.
    #[serde(rename = "name", default = "default_author_label")]
    pub author_label: String,
    /// Trimmed comment text.
    #[serde(rename = "text")]
    pub body: String,
    /// Epoch milliseconds; client-assigned for pending records.
    #[serde(rename = "ts")]
    pub timestamp_ms: i64,
    /// Identity allowed to delete this record. Empty for server records
    /// whose owner is not known yet.
    #[serde(rename = "clientId", default)]
    pub owner_token: String,
    /// Id the server assigned to a pending record whose create succeeded.
    /// `None` for server records and for creates that never went through.
    #[serde(rename = "serverId", default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<CommentId>,
}

impl CommentRecord {
    /// A record as reported by the remote source (no owner yet).
    pub fn authoritative(
        id: impl Into<String>,
        author_label: Option<&str>,
        body: impl Into<String>,
        timestamp_ms: i64,
    ) -> Self {
        let author_label = author_label
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map_or_else(default_author_label, ToString::to_string);

        Self {
            id: CommentId::new(id),
            author_label,
            body: body.into(),
            timestamp_ms,
            owner_token: String::new(),
            server_id: None,
        }
    }

    /// Record the id the server assigned to this pending record.
    #[must_use]
    pub fn with_server_id(mut self, id: CommentId) -> Self {
        self.server_id = Some(id);
        self
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.id.is_pending()
    }

    /// The id the server knows this record by, if it has one.
    #[must_use]
    pub fn remote_id(&self) -> Option<&CommentId> {
        if self.is_pending() {
            self.server_id.as_ref()
        } else {
            Some(&self.id)
        }
    }

    /// Body with surrounding whitespace removed, as used for signatures.
    #[must_use]
    pub fn normalized_body(&self) -> &str {
        self.body.trim()
    }

    /// Case-insensitive comparison of the author label with `name`.
    #[must_use]
    pub fn authored_by(&self, name: &str) -> bool {
        labels_match(&self.author_label, name)
    }
}

/// Unicode case-insensitive comparison of two display names.
#[must_use]
pub fn labels_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    !a.is_empty() && a.to_lowercase() == b.to_lowercase()
}

// ---------------------------------------------------------------------------
// List helpers
// ---------------------------------------------------------------------------

/// Sort by timestamp, newest first. Stable, so equal timestamps keep their
/// relative order and sorting twice is a no-op.
pub fn sort_newest_first(records: &mut [CommentRecord]) {
    records.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
}

/// Keep the first `cap` records of a newest-first list.
///
/// Returns the evicted tail, oldest-by-position last.
pub fn retain_most_recent(records: &mut Vec<CommentRecord>, cap: usize) -> Vec<CommentRecord> {
    if records.len() <= cap {
        return Vec::new();
    }
    records.split_off(cap)
}

/// Drop records whose id was already seen earlier in the list.
#[must_use]
pub fn dedupe_by_id(records: Vec<CommentRecord>) -> Vec<CommentRecord> {
    let mut seen: HashSet<CommentId> = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|record| seen.insert(record.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, ts: i64) -> CommentRecord {
        CommentRecord::authoritative(id, Some("ana"), "body text", ts)
    }

    #[test]
    fn pending_ids_are_recognised() {
        let id = CommentId::pending(0x18f, 42);
        assert!(id.is_pending());
        assert_eq!(id.as_str(), "pending-18f-000000000000002a");
        assert!(!CommentId::new("srv-1").is_pending());
        assert!(!CommentId::new("3f2a9c1e-uuid").is_pending());
    }

    #[test]
    fn subject_key_prefers_post_id() {
        let key = SubjectKey::for_post(Some("42"), Some("hello-world")).unwrap();
        assert_eq!(key.as_str(), "post-42");
        assert_eq!(key.post_id(), Some("42"));
        assert_eq!(key.slug(), None);

        let key = SubjectKey::for_post(Some("  "), Some("hello-world")).unwrap();
        assert_eq!(key.as_str(), "slug-hello-world");
        assert_eq!(key.slug(), Some("hello-world"));

        assert!(SubjectKey::for_post(None, None).is_none());
    }

    #[test]
    fn remote_id_follows_the_create_response() {
        let confirmed = record("srv-1", 1);
        assert_eq!(confirmed.remote_id(), Some(&CommentId::new("srv-1")));

        let mut pending = record("x", 1);
        pending.id = CommentId::pending(1, 1);
        assert_eq!(pending.remote_id(), None);

        let created = pending.with_server_id(CommentId::new("srv-2"));
        assert_eq!(created.remote_id(), Some(&CommentId::new("srv-2")));
        let json = serde_json::to_string(&created).unwrap();
        assert!(json.contains(r#""serverId":"srv-2""#));
    }

    #[test]
    fn legacy_json_shape_round_trips() {
        let raw = r#"[{"id":"abc","name":"Ana","text":"hola mundo","ts":1000,"clientId":"c1"}]"#;
        let records: Vec<CommentRecord> = serde_json::from_str(raw).unwrap();
        assert_eq!(records[0].author_label, "Ana");
        assert_eq!(records[0].body, "hola mundo");
        assert_eq!(records[0].owner_token, "c1");

        let json = serde_json::to_string(&records).unwrap();
        assert_eq!(json, raw);
    }

    #[test]
    fn missing_name_and_owner_get_defaults() {
        let raw = r#"{"id":"abc","text":"hola","ts":5}"#;
        let record: CommentRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.author_label, ANONYMOUS_LABEL);
        assert_eq!(record.owner_token, "");
    }

    #[test]
    fn authoritative_blank_author_becomes_anonymous() {
        let record = CommentRecord::authoritative("1", Some("   "), "x", 0);
        assert_eq!(record.author_label, ANONYMOUS_LABEL);
        let record = CommentRecord::authoritative("1", None, "x", 0);
        assert_eq!(record.author_label, ANONYMOUS_LABEL);
    }

    #[test]
    fn author_match_ignores_case() {
        let record = CommentRecord::authoritative("1", Some("José Ávila"), "x", 0);
        assert!(record.authored_by("josé ávila"));
        assert!(record.authored_by(" JOSÉ ÁVILA "));
        assert!(!record.authored_by("jose avila"));
        assert!(!labels_match("", ""));
    }

    #[test]
    fn sort_is_stable_for_equal_timestamps() {
        let mut records = vec![record("a", 5), record("b", 9), record("c", 5)];
        sort_newest_first(&mut records);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "c"]);
    }

    #[test]
    fn retain_most_recent_evicts_tail() {
        let mut records: Vec<_> = (0..5).map(|i| record(&i.to_string(), i)).collect();
        let evicted = retain_most_recent(&mut records, 3);
        assert_eq!(records.len(), 3);
        assert_eq!(evicted.len(), 2);
        assert_eq!(evicted[0].id.as_str(), "3");
        assert!(retain_most_recent(&mut records, 3).is_empty());
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let mut second = record("a", 2);
        second.body = "later".into();
        let out = dedupe_by_id(vec![record("a", 1), second, record("b", 3)]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].timestamp_ms, 1);
    }
}
