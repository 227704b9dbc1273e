//! Merging local comment state with an authoritative snapshot.
//!
//! These functions are pure: they take the local list and a fresh server
//! list and return the merged list plus a report of what happened. The
//! [`CommentThread`](crate::thread::CommentThread) decides when to call them
//! and persists the result.
//!
//! # Merge rules
//!
//! - Authoritative records are ground truth and always present (first
//!   occurrence wins on duplicate ids).
//! - A local confirmed record whose id the server reports is replaced by the
//!   server copy; the server copy inherits the local owner token when its
//!   own is empty.
//! - A local confirmed record the server does not report passes through
//!   (records cached by the legacy widget have no server twin).
//! - A pending record whose create returned a server id is folded into the
//!   record with that id. Otherwise it is folded into the closest same-body
//!   authoritative record within the matcher's window. Either way its owner
//!   token transfers, and each authoritative record absorbs at most one
//!   pending record. Uncovered pending records stay.
//! - A server record whose local copy already carries an owner token stands
//!   for one of this client's earlier submissions and absorbs no further
//!   pending record, so folding is stable across repeated passes.
//! - The result is sorted newest first (stable), so merging the same inputs
//!   twice yields the same list.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::identity::Identity;
use crate::matcher::SignatureMatcher;
use crate::model::{CommentId, CommentRecord, dedupe_by_id, sort_newest_first};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Outcome of a merge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Merged records, newest first.
    pub records: Vec<CommentRecord>,
    /// Pending ids folded into an authoritative twin.
    pub folded: Vec<CommentId>,
    /// Pending records left unreconciled.
    pub kept_pending: usize,
    /// Local confirmed records the server did not report.
    pub passed_through: usize,
    /// Authoritative id that confirmed the just-submitted record.
    pub confirmed: Option<CommentId>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Initial merge of a cached list with a freshly fetched server list.
///
/// Use a wide window ([`SignatureMatcher::on_load`]) so pending records whose
/// submit succeeded in an earlier session are folded away instead of lingering.
#[must_use]
pub fn merge_on_load(
    cached: &[CommentRecord],
    authoritative: Vec<CommentRecord>,
    matcher: &SignatureMatcher,
) -> MergeReport {
    let mut fold = Fold::new(authoritative);
    fold.claim_owned_twins(cached);
    fold.absorb_local(cached, matcher, None);
    fold.finish(None)
}

/// Merge after a successful create of `optimistic`.
///
/// Server records this client already owns are set aside first, so an
/// identical earlier comment never stands in for the new one. The
/// optimistic record is then matched; if covered, the covering record is
/// marked as owned by `owner_token` and the optimistic copy is dropped.
/// Otherwise it stays, provided it is still in `current`. Once it has left
/// `current` (folded by an earlier pass, or removed) only its known server
/// id can confirm it. Other pending records of `current` are folded by the
/// usual rules.
#[must_use]
pub fn merge_after_submit(
    current: &[CommentRecord],
    optimistic: &CommentRecord,
    authoritative: Vec<CommentRecord>,
    matcher: &SignatureMatcher,
    owner_token: &str,
) -> MergeReport {
    let mut fold = Fold::new(authoritative);
    fold.claim_owned_twins(current);

    let still_there = current.iter().find(|record| record.id == optimistic.id);
    let cover = if still_there.is_some() {
        fold.claim(optimistic, matcher)
    } else {
        fold.claim_by_server_id(optimistic)
    };
    let confirmed = cover.map(|index| {
        let record = &mut fold.authoritative[index];
        record.owner_token = owner_token.to_string();
        record.id.clone()
    });

    fold.absorb_local(current, matcher, Some(&optimistic.id));

    if confirmed.is_some() {
        fold.folded.push(optimistic.id.clone());
    } else if let Some(still_there) = still_there {
        fold.kept_pending.push(still_there.clone());
    }

    fold.finish(confirmed)
}

/// Give every record authored under the identity's display name to its
/// client id. Returns the number of records changed.
pub fn retag_ownership(records: &mut [CommentRecord], identity: &Identity) -> usize {
    let Some(name) = identity.display_name.as_deref() else {
        return 0;
    };
    if identity.client_id.is_empty() {
        return 0;
    }

    let mut changed = 0;
    for record in records.iter_mut() {
        if record.authored_by(name) && record.owner_token != identity.client_id {
            record.owner_token.clone_from(&identity.client_id);
            changed += 1;
        }
    }
    changed
}

// ---------------------------------------------------------------------------
// Fold
// ---------------------------------------------------------------------------

struct Fold {
    authoritative: Vec<CommentRecord>,
    by_id: HashMap<CommentId, usize>,
    claimed: HashSet<usize>,
    passthrough: Vec<CommentRecord>,
    kept_pending: Vec<CommentRecord>,
    folded: Vec<CommentId>,
}

impl Fold {
    fn new(authoritative: Vec<CommentRecord>) -> Self {
        let authoritative = dedupe_by_id(authoritative);
        let by_id = authoritative
            .iter()
            .enumerate()
            .map(|(index, record)| (record.id.clone(), index))
            .collect();
        Self {
            authoritative,
            by_id,
            claimed: HashSet::new(),
            passthrough: Vec::new(),
            kept_pending: Vec::new(),
            folded: Vec::new(),
        }
    }

    /// Claim the authoritative record covering `pending`, if any: the one
    /// carrying its known server id, else the closest unclaimed signature
    /// match.
    fn claim(&mut self, pending: &CommentRecord, matcher: &SignatureMatcher) -> Option<usize> {
        if let Some(index) = self.claim_by_server_id(pending) {
            return Some(index);
        }
        let index = matcher.find_cover_excluding(pending, &self.authoritative, &self.claimed)?;
        self.claimed.insert(index);
        Some(index)
    }

    /// Claim the record the server assigned to `pending`. Server ids are
    /// unique, so this ignores earlier claims.
    fn claim_by_server_id(&mut self, pending: &CommentRecord) -> Option<usize> {
        let index = *self.by_id.get(pending.server_id.as_ref()?)?;
        self.claimed.insert(index);
        Some(index)
    }

    /// Mark server records whose local copy is already owned as claimed.
    fn claim_owned_twins(&mut self, local: &[CommentRecord]) {
        for record in local {
            if record.is_pending() || record.owner_token.is_empty() {
                continue;
            }
            if let Some(&index) = self.by_id.get(&record.id) {
                self.claimed.insert(index);
            }
        }
    }

    fn inherit_owner(&mut self, index: usize, owner_token: &str) {
        let record = &mut self.authoritative[index];
        if record.owner_token.is_empty() && !owner_token.is_empty() {
            record.owner_token = owner_token.to_string();
        }
    }

    fn absorb_local(
        &mut self,
        local: &[CommentRecord],
        matcher: &SignatureMatcher,
        skip: Option<&CommentId>,
    ) {
        let mut seen: HashSet<&CommentId> = HashSet::with_capacity(local.len());
        for record in local {
            if skip == Some(&record.id) || !seen.insert(&record.id) {
                continue;
            }

            if record.is_pending() {
                if let Some(index) = self.claim(record, matcher) {
                    debug!(
                        pending = %record.id,
                        authoritative = %self.authoritative[index].id,
                        "pending comment covered by server copy"
                    );
                    self.inherit_owner(index, &record.owner_token);
                    self.folded.push(record.id.clone());
                } else {
                    self.kept_pending.push(record.clone());
                }
                continue;
            }

            if let Some(&index) = self.by_id.get(&record.id) {
                self.inherit_owner(index, &record.owner_token);
            } else {
                self.passthrough.push(record.clone());
            }
        }
    }

    fn finish(self, confirmed: Option<CommentId>) -> MergeReport {
        let kept_pending = self.kept_pending.len();
        let passed_through = self.passthrough.len();

        let mut records = self.authoritative;
        records.extend(self.passthrough);
        records.extend(self.kept_pending);
        let mut records = dedupe_by_id(records);
        sort_newest_first(&mut records);

        MergeReport {
            records,
            folded: self.folded,
            kept_pending,
            passed_through,
            confirmed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60_000;
    const HOUR: i64 = 60 * MINUTE;

    fn pending(body: &str, ts: i64, owner: &str) -> CommentRecord {
        CommentRecord {
            id: CommentId::pending(ts, u64::try_from(ts).unwrap_or(0)),
            author_label: "Anonymous".into(),
            body: body.into(),
            timestamp_ms: ts,
            owner_token: owner.into(),
            server_id: None,
        }
    }

    fn server(id: &str, author: &str, body: &str, ts: i64) -> CommentRecord {
        CommentRecord::authoritative(id, Some(author), body, ts)
    }

    fn ids(records: &[CommentRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn load_folds_covered_pending_and_keeps_the_rest() {
        let cached = vec![
            pending("confirmed later", 10 * HOUR, "c1"),
            pending("never arrived", 9 * HOUR, "c1"),
        ];
        let authoritative = vec![
            server("srv-2", "Bob", "unrelated", 11 * HOUR),
            server("srv-1", "Anonymous", "confirmed later", 10 * HOUR + 3 * HOUR),
        ];

        let report = merge_on_load(&cached, authoritative, &SignatureMatcher::on_load());
        assert_eq!(ids(&report.records)[..2], ["srv-1", "srv-2"]);
        assert!(report.records[2].is_pending());
        assert_eq!(report.records[2].body, "never arrived");
        assert_eq!(report.folded, vec![cached[0].id.clone()]);
        assert_eq!(report.kept_pending, 1);
        assert_eq!(report.records[0].owner_token, "c1");
    }

    #[test]
    fn load_window_is_a_day() {
        let cached = vec![pending("old", 0, "c1")];
        let authoritative = vec![server("srv-1", "A", "old", 25 * HOUR)];
        let report = merge_on_load(&cached, authoritative, &SignatureMatcher::on_load());
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.kept_pending, 1);
    }

    #[test]
    fn confirmed_local_records_pass_through_or_yield_to_server() {
        let mut mine = server("srv-1", "Anonymous", "mine", 100);
        mine.owner_token = "c1".into();
        let legacy = CommentRecord {
            id: CommentId::new("3f1c-legacy"),
            author_label: "Ana".into(),
            body: "old local comment".into(),
            timestamp_ms: 50,
            owner_token: "c1".into(),
            server_id: None,
        };
        let mut edited_on_server = server("srv-1", "Anonymous", "mine (server copy)", 100);
        edited_on_server.owner_token.clear();

        let report = merge_on_load(
            &[mine, legacy.clone()],
            vec![edited_on_server],
            &SignatureMatcher::on_load(),
        );
        assert_eq!(ids(&report.records), ["srv-1", "3f1c-legacy"]);
        assert_eq!(report.records[0].body, "mine (server copy)");
        assert_eq!(report.records[0].owner_token, "c1");
        assert_eq!(report.records[1], legacy);
        assert_eq!(report.passed_through, 1);
    }

    #[test]
    fn duplicate_server_ids_collapse() {
        let authoritative = vec![server("srv-1", "A", "x", 2), server("srv-1", "A", "y", 1)];
        let report = merge_on_load(&[], authoritative, &SignatureMatcher::on_load());
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].body, "x");
    }

    #[test]
    fn each_server_record_absorbs_one_pending() {
        let cached = vec![pending("same text", 1_000, "c1"), pending("same text", 2_000, "c1")];
        let authoritative = vec![server("srv-1", "A", "same text", 1_500)];
        let report = merge_on_load(&cached, authoritative, &SignatureMatcher::on_load());
        assert_eq!(report.folded.len(), 1);
        assert_eq!(report.kept_pending, 1);
        assert_eq!(report.records.len(), 2);
    }

    #[test]
    fn owned_server_records_absorb_nothing_more() {
        let cached = vec![pending("same text", 1_000, "c1"), pending("same text", 2_000, "c1")];
        let authoritative = vec![server("srv-1", "A", "same text", 1_500)];
        let matcher = SignatureMatcher::on_load();

        let first = merge_on_load(&cached, authoritative.clone(), &matcher);
        let second = merge_on_load(&first.records, authoritative, &matcher);
        assert_eq!(second.folded.len(), 0);
        assert_eq!(second.kept_pending, 1);
        assert_eq!(first.records, second.records);
    }

    #[test]
    fn unowned_server_copy_still_absorbs_its_pending() {
        let cached = vec![
            server("srv-1", "A", "skewed", 20 * MINUTE),
            pending("skewed", 0, "c1"),
        ];
        let report = merge_on_load(
            &cached,
            vec![server("srv-1", "A", "skewed", 20 * MINUTE)],
            &SignatureMatcher::on_load(),
        );
        assert_eq!(ids(&report.records), ["srv-1"]);
        assert_eq!(report.records[0].owner_token, "c1");
    }

    #[test]
    fn submit_merge_confirms_and_tags_owner() {
        let optimistic = pending("hello world", 1_000, "c1");
        let current = vec![optimistic.clone(), server("srv-0", "Bob", "first", 500)];
        let authoritative = vec![
            server("srv-0", "Bob", "first", 500),
            server("srv-1", "Anonymous", "hello world", 1_005),
        ];

        let report = merge_after_submit(
            &current,
            &optimistic,
            authoritative,
            &SignatureMatcher::after_submit(),
            "c1",
        );
        assert_eq!(ids(&report.records), ["srv-1", "srv-0"]);
        assert_eq!(report.confirmed, Some(CommentId::new("srv-1")));
        assert_eq!(report.records[0].owner_token, "c1");
        assert_eq!(report.records[1].owner_token, "");
        assert_eq!(report.folded, vec![optimistic.id]);
    }

    #[test]
    fn submit_merge_keeps_unmatched_optimistic() {
        let optimistic = pending("not listed yet", 1_000, "c1");
        let current = vec![optimistic.clone()];
        let report = merge_after_submit(
            &current,
            &optimistic,
            vec![server("srv-9", "Bob", "something else", 900)],
            &SignatureMatcher::after_submit(),
            "c1",
        );
        assert_eq!(report.confirmed, None);
        assert_eq!(report.kept_pending, 1);
        assert_eq!(ids(&report.records)[0], optimistic.id.as_str());
    }

    #[test]
    fn submit_merge_does_not_resurrect_removed_optimistic() {
        let optimistic = pending("gone", 1_000, "c1");
        let report = merge_after_submit(
            &[],
            &optimistic,
            vec![],
            &SignatureMatcher::after_submit(),
            "c1",
        );
        assert!(report.records.is_empty());
    }

    #[test]
    fn submit_merge_is_idempotent() {
        let optimistic = pending("twice", 1_000, "c1");
        let older = pending("older pending", 500, "c1");
        let current = vec![optimistic.clone(), older];
        let authoritative = vec![
            server("srv-1", "Anonymous", "twice", 1_010),
            server("srv-0", "Bob", "hi", 1_010),
        ];
        let matcher = SignatureMatcher::after_submit();

        let first = merge_after_submit(&current, &optimistic, authoritative.clone(), &matcher, "c1");
        let second = merge_after_submit(&first.records, &optimistic, authoritative, &matcher, "c1");
        assert_eq!(first.records, second.records);
    }

    #[test]
    fn submit_merge_skips_server_records_already_owned() {
        let mut first = server("srv-1", "Anonymous", "same words", 1_000);
        first.owner_token = "c1".into();
        let optimistic = pending("same words", 61_000, "c1");
        let current = vec![optimistic.clone(), first.clone()];

        let report = merge_after_submit(
            &current,
            &optimistic,
            vec![server("srv-1", "Anonymous", "same words", 1_000)],
            &SignatureMatcher::after_submit(),
            "c1",
        );
        assert_eq!(report.confirmed, None);
        assert_eq!(report.kept_pending, 1);
        assert_eq!(ids(&report.records), [optimistic.id.as_str(), "srv-1"]);
    }

    #[test]
    fn known_server_id_beats_a_closer_signature() {
        let optimistic = pending("twin", 10 * MINUTE, "c1").with_server_id(CommentId::new("srv-2"));
        let current = vec![optimistic.clone()];
        let authoritative = vec![
            server("srv-1", "Bob", "twin", 10 * MINUTE),
            server("srv-2", "Anonymous", "twin", 12 * MINUTE),
        ];

        let report = merge_after_submit(
            &current,
            &optimistic,
            authoritative,
            &SignatureMatcher::after_submit(),
            "c1",
        );
        assert_eq!(report.confirmed, Some(CommentId::new("srv-2")));
        let owners: Vec<_> = report.records.iter().map(|r| r.owner_token.as_str()).collect();
        assert_eq!(ids(&report.records), ["srv-2", "srv-1"]);
        assert_eq!(owners, ["c1", ""]);
    }

    #[test]
    fn load_folds_by_server_id_outside_the_window() {
        let cached = vec![pending("late", 0, "c1").with_server_id(CommentId::new("srv-7"))];
        let authoritative = vec![server("srv-7", "Anonymous", "late", 3 * 24 * HOUR)];
        let report = merge_on_load(&cached, authoritative, &SignatureMatcher::on_load());
        assert_eq!(report.folded.len(), 1);
        assert_eq!(ids(&report.records), ["srv-7"]);
        assert_eq!(report.records[0].owner_token, "c1");
    }

    #[test]
    fn retag_uses_display_name_case_insensitively() {
        let mut records = vec![
            server("1", "ana", "a", 1),
            server("2", "Bob", "b", 2),
            server("3", "ANA", "c", 3),
        ];
        let identity = Identity {
            client_id: "c1".into(),
            display_name: Some("Ana".into()),
        };

        assert_eq!(retag_ownership(&mut records, &identity), 2);
        assert_eq!(records[0].owner_token, "c1");
        assert_eq!(records[1].owner_token, "");
        assert_eq!(records[2].owner_token, "c1");
        assert_eq!(retag_ownership(&mut records, &identity), 0);

        let nameless = Identity {
            client_id: "c1".into(),
            display_name: None,
        };
        assert_eq!(retag_ownership(&mut records, &nameless), 0);
    }
}
