//! Signature matching between optimistic and authoritative comments.
//!
//! A pending record's id and timestamp are client-side estimates, so it is
//! paired with its server twin by *signature*: identical trimmed body, and
//! the closest timestamp within a tolerance window.
//!
//! # Limitations
//!
//! This is a heuristic. The remote source does not echo a client-supplied
//! idempotency key, so two genuinely distinct comments with the same text
//! posted inside the window are indistinguishable. Each authoritative record
//! absorbs at most one pending record per merge pass (see
//! [`SignatureMatcher::find_cover_excluding`]), which keeps a second
//! identical comment visible until the server reports a second twin.

use std::collections::HashSet;

use crate::model::CommentRecord;

const MILLIS_PER_MINUTE: f64 = 60_000.0;

/// Window used right after an explicit submit.
pub const SUBMIT_WINDOW_MINUTES: f64 = 5.0;

/// Window used when cleaning up stale pending records at load time.
pub const LOAD_WINDOW_MINUTES: f64 = 24.0 * 60.0;

/// Matches a pending record to the authoritative record it represents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignatureMatcher {
    window_minutes: f64,
}

impl SignatureMatcher {
    /// A matcher accepting time differences up to and including
    /// `window_minutes`. Negative or NaN windows match nothing.
    #[must_use]
    pub const fn new(window_minutes: f64) -> Self {
        Self { window_minutes }
    }

    /// Matcher for same-session reconciliation after a submit.
    #[must_use]
    pub const fn after_submit() -> Self {
        Self::new(SUBMIT_WINDOW_MINUTES)
    }

    /// Matcher for stale-cache cleanup at load time.
    #[must_use]
    pub const fn on_load() -> Self {
        Self::new(LOAD_WINDOW_MINUTES)
    }

    #[must_use]
    pub const fn window_minutes(&self) -> f64 {
        self.window_minutes
    }

    /// Absolute time difference in minutes between two records.
    #[must_use]
    pub fn minutes_apart(a: &CommentRecord, b: &CommentRecord) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let diff = a.timestamp_ms.abs_diff(b.timestamp_ms) as f64;
        diff / MILLIS_PER_MINUTE
    }

    /// Whether `authoritative` has the same signature as `pending`.
    #[must_use]
    pub fn covers(&self, pending: &CommentRecord, authoritative: &CommentRecord) -> bool {
        pending.normalized_body() == authoritative.normalized_body()
            && Self::minutes_apart(pending, authoritative) <= self.window_minutes
    }

    /// Index of the authoritative record covering `pending`, if any.
    ///
    /// Among same-body candidates the smallest time difference wins; equal
    /// differences go to the earliest-listed candidate.
    #[must_use]
    pub fn find_cover(
        &self,
        pending: &CommentRecord,
        authoritative: &[CommentRecord],
    ) -> Option<usize> {
        self.find_cover_excluding(pending, authoritative, &HashSet::new())
    }

    /// Like [`find_cover`](Self::find_cover), skipping indices in `claimed`.
    #[must_use]
    pub fn find_cover_excluding(
        &self,
        pending: &CommentRecord,
        authoritative: &[CommentRecord],
        claimed: &HashSet<usize>,
    ) -> Option<usize> {
        let body = pending.normalized_body();
        let mut best: Option<(usize, f64)> = None;

        for (index, candidate) in authoritative.iter().enumerate() {
            if claimed.contains(&index) || candidate.normalized_body() != body {
                continue;
            }
            let minutes = Self::minutes_apart(pending, candidate);
            if best.is_none_or(|(_, closest)| minutes < closest) {
                best = Some((index, minutes));
            }
        }

        best.filter(|&(_, minutes)| minutes <= self.window_minutes)
            .map(|(index, _)| index)
    }
}

impl Default for SignatureMatcher {
    fn default() -> Self {
        Self::after_submit()
    }
}
