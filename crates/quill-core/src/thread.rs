//! One subject's comment list: optimistic mutations, rollback, and
//! reconciliation against the remote source.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --load()--> Loading --ok--> Merged --submit()--> Reconciling --ok--> Merged
//!                     \--err--> (previous state)             \--err--> stays Reconciling
//! ```
//!
//! A thread is created with the cached list already in memory ("read on
//! mount") in state [`ThreadState::Idle`]. Every mutation reads the latest
//! in-memory list, applies its change, persists, and only then talks to the
//! remote source.
//!
//! Mutations come in two phases so a host can run the remote call however it
//! likes (another thread, an event loop): `begin_*` validates, applies the
//! optimistic change and returns a ticket; `finish_*` applies the remote
//! outcome. [`CommentThread::submit`] and [`CommentThread::remove`] run both
//! phases around a direct remote call.
//!
//! # Invariants
//!
//! - At most one submit is open per subject.
//! - A failed remote call restores the list (memory and cache) to what it
//!   would have been without the mutation; interleaved changes survive.
//! - A ticket finished after the thread switched subject never touches the
//!   current subject's list.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::CommentCache;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::MutationError;
use crate::identity::{Identity, IdentityProvider, IdentityWatch};
use crate::model::{
    ANONYMOUS_LABEL, CommentId, CommentRecord, SubjectKey, dedupe_by_id, labels_match,
    retain_most_recent, sort_newest_first,
};
use crate::reconcile::{merge_after_submit, merge_on_load, retag_ownership};
use crate::remote::{CreatedComment, RemoteComments, RemoteError};
use crate::retry::{Sleeper, ThreadSleeper, fetch_until_nonempty};
use crate::store::PersistedStore;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Where a thread is in its load/reconcile cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Showing the cached list; no server snapshot merged yet.
    Idle,
    /// Initial fetch in progress.
    Loading,
    /// Cached and authoritative lists merged.
    Merged,
    /// Re-fetching after a submit. Stays here if that fetch fails.
    Reconciling,
}

/// Everything a thread talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn PersistedStore>,
    pub remote: Arc<dyn RemoteComments>,
    pub clock: Arc<dyn Clock>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl Collaborators {
    /// Collaborators with the system clock and a blocking sleeper.
    pub fn new(store: Arc<dyn PersistedStore>, remote: Arc<dyn RemoteComments>) -> Self {
        Self {
            store,
            remote,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

/// An optimistic submit awaiting its remote outcome.
#[derive(Debug, Clone)]
#[must_use = "finish the submit, or the subject stays blocked"]
pub struct SubmitTicket {
    subject: SubjectKey,
    pending: CommentRecord,
    evicted: Vec<CommentRecord>,
}

impl SubmitTicket {
    #[must_use]
    pub fn subject(&self) -> &SubjectKey {
        &self.subject
    }

    /// The optimistic record inserted at the head of the list.
    #[must_use]
    pub fn pending(&self) -> &CommentRecord {
        &self.pending
    }
}

/// An optimistic removal awaiting its remote outcome.
#[derive(Debug, Clone)]
#[must_use = "finish the removal so a failure can be rolled back"]
pub struct RemoveTicket {
    subject: SubjectKey,
    removed: CommentRecord,
    index: usize,
}

impl RemoveTicket {
    #[must_use]
    pub fn subject(&self) -> &SubjectKey {
        &self.subject
    }

    #[must_use]
    pub fn removed(&self) -> &CommentRecord {
        &self.removed
    }

    /// The id to delete on the server. `None` for a pending record whose
    /// create never succeeded.
    #[must_use]
    pub fn remote_id(&self) -> Option<&CommentId> {
        self.removed.remote_id()
    }

    /// Whether removing this record needs no remote call.
    #[must_use]
    pub fn is_local_only(&self) -> bool {
        self.remote_id().is_none()
    }
}

/// How the post-submit reconciliation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The server copy was found; the optimistic record was replaced by it.
    Confirmed { id: CommentId },
    /// The server did not list a matching comment; the optimistic record
    /// stays visible.
    Unconfirmed,
    /// The re-fetch failed; the list was left untouched.
    Deferred { error: RemoteError },
    /// The thread moved to another subject before the create returned.
    Stale,
}

/// Result of a successful submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReport {
    pub pending_id: CommentId,
    pub server_id: CommentId,
    pub outcome: ReconcileOutcome,
}

/// Result of a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub total: usize,
    pub folded: usize,
    pub kept_pending: usize,
    pub passed_through: usize,
}

// ---------------------------------------------------------------------------
// CommentThread
// ---------------------------------------------------------------------------

/// The comment list of the subject currently on screen.
pub struct CommentThread {
    subject: SubjectKey,
    records: Vec<CommentRecord>,
    state: ThreadState,
    in_flight: HashMap<SubjectKey, CommentId>,
    config: EngineConfig,
    cache: CommentCache,
    identity: IdentityProvider,
    identity_watch: IdentityWatch,
    remote: Arc<dyn RemoteComments>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl CommentThread {
    /// Open a thread on `subject`, hydrating the list from the cache.
    ///
    /// `namespace` prefixes every storage key.
    pub fn new(
        subject: SubjectKey,
        collaborators: Collaborators,
        config: EngineConfig,
        namespace: &str,
    ) -> Self {
        let Collaborators {
            store,
            remote,
            clock,
            sleeper,
        } = collaborators;

        let cache = CommentCache::new(store.clone(), namespace, config.cache_capacity);
        let identity = IdentityProvider::new(store, clock.clone(), namespace);
        let identity_watch = identity.watch();
        let records = cache.load(&subject);

        Self {
            subject,
            records,
            state: ThreadState::Idle,
            in_flight: HashMap::new(),
            config,
            cache,
            identity,
            identity_watch,
            remote,
            clock,
            sleeper,
        }
    }

    #[must_use]
    pub fn subject(&self) -> &SubjectKey {
        &self.subject
    }

    #[must_use]
    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Records in storage order (newest first by position).
    #[must_use]
    pub fn records(&self) -> &[CommentRecord] {
        &self.records
    }

    /// Records as presented: sorted by timestamp, newest first.
    #[must_use]
    pub fn view(&self) -> Vec<CommentRecord> {
        let mut view = self.records.clone();
        sort_newest_first(&mut view);
        view
    }

    /// Whether a submit is open for the current subject.
    #[must_use]
    pub fn is_submitting(&self) -> bool {
        self.in_flight.contains_key(&self.subject)
    }

    #[must_use]
    pub fn identity_provider(&self) -> &IdentityProvider {
        &self.identity
    }

    /// Current identity, creating the client id on first use.
    pub fn identity(&self) -> Identity {
        self.identity.identity()
    }

    #[must_use]
    pub fn cache(&self) -> &CommentCache {
        &self.cache
    }

    /// Whether the current identity may remove `id`.
    pub fn can_remove(&self, id: &CommentId) -> bool {
        self.records
            .iter()
            .find(|record| &record.id == id)
            .is_some_and(|record| self.identity().owns(record))
    }

    /// Point the thread at another subject. Open tickets for the old
    /// subject keep their rollback rights but no longer touch this list.
    pub fn switch_subject(&mut self, subject: SubjectKey) {
        if subject == self.subject {
            return;
        }
        debug!(from = %self.subject, to = %subject, "switching comment subject");
        self.records = self.cache.load(&subject);
        self.subject = subject;
        self.state = ThreadState::Idle;
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Fetch the authoritative list and merge it with local state.
    ///
    /// On failure the list is left as it was and the state returns to what
    /// it was before the call.
    pub fn load(&mut self) -> Result<LoadReport, RemoteError> {
        let previous = self.state;
        self.state = ThreadState::Loading;
        let subject = self.subject.clone();

        let authoritative = match self.remote.list_comments(&subject) {
            Ok(list) => list,
            Err(err) => {
                warn!(%subject, error = %err, "comment fetch failed; keeping local list");
                self.state = previous;
                return Err(err);
            }
        };

        // Memory first: it holds writes that failed to persist this session.
        let mut local = self.records.clone();
        local.extend(self.cache.load(&subject));
        let local = dedupe_by_id(local);

        let report = merge_on_load(&local, authoritative, &self.config.load_matcher());
        let summary = LoadReport {
            total: report.records.len(),
            folded: report.folded.len(),
            kept_pending: report.kept_pending,
            passed_through: report.passed_through,
        };
        debug!(%subject, ?summary, "merged cached and authoritative comments");

        self.publish(report.records);
        self.state = ThreadState::Merged;
        Ok(summary)
    }

    /// Re-fetch after a successful create and fold `optimistic` into its
    /// server copy.
    ///
    /// An empty list is retried per the retry policy. If the list stays
    /// empty the optimistic record remains, unreconciled. A fetch error
    /// leaves the list untouched and the thread in
    /// [`ThreadState::Reconciling`]; calling this again retries.
    pub fn reconcile_after_submit(
        &mut self,
        optimistic: &CommentRecord,
    ) -> Result<ReconcileOutcome, RemoteError> {
        self.state = ThreadState::Reconciling;
        let subject = self.subject.clone();

        let fetched = fetch_until_nonempty(&self.config.retry, self.sleeper.as_ref(), || {
            self.remote.list_comments(&subject)
        })
        .inspect_err(|err| {
            warn!(%subject, error = %err, "reconciliation fetch failed");
        })?;

        if fetched.is_empty() {
            debug!(%subject, pending = %optimistic.id, "server list still empty; keeping optimistic comment");
            self.state = ThreadState::Merged;
            return Ok(ReconcileOutcome::Unconfirmed);
        }

        let identity = self.identity();
        let report = merge_after_submit(
            &self.records,
            optimistic,
            fetched,
            &self.config.submit_matcher(),
            &identity.client_id,
        );
        let outcome = match report.confirmed.clone() {
            Some(id) => {
                info!(%subject, pending = %optimistic.id, confirmed = %id, "optimistic comment confirmed");
                ReconcileOutcome::Confirmed { id }
            }
            None => ReconcileOutcome::Unconfirmed,
        };

        self.publish(report.records);
        self.state = ThreadState::Merged;
        Ok(outcome)
    }

    /// Give records authored under the cached display name to this client.
    /// Returns the number of records changed.
    pub fn retag(&mut self) -> usize {
        let identity = self.identity();
        let changed = retag_ownership(&mut self.records, &identity);
        if changed > 0 {
            debug!(subject = %self.subject, changed, "re-tagged comment ownership");
            self.cache.save(&self.subject, &self.records);
        }
        changed
    }

    /// Apply identity changes made through the shared store (for example a
    /// display name learned by another thread). Returns the number of
    /// records re-tagged.
    pub fn poll_identity_changes(&mut self) -> usize {
        if self.identity_watch.drain() {
            self.retag()
        } else {
            0
        }
    }

    fn publish(&mut self, mut records: Vec<CommentRecord>) {
        let identity = self.identity();
        retag_ownership(&mut records, &identity);
        retain_most_recent(&mut records, self.config.cache_capacity);
        self.cache.save(&self.subject, &records);
        self.records = records;
    }

    /// Cache the author name revealed by a create response, or forget the
    /// cached one when the response carries none.
    fn remember_author(&mut self, author_label: Option<&str>) {
        let revealed = author_label
            .map(str::trim)
            .filter(|label| !label.is_empty() && !labels_match(label, ANONYMOUS_LABEL));
        if revealed.map(str::to_string) == self.identity.cached_display_name() {
            return;
        }
        self.identity.set_cached_display_name(revealed);
        self.retag();
    }

    // -----------------------------------------------------------------------
    // Submit
    // -----------------------------------------------------------------------

    /// Validate `body`, insert an optimistic record and persist it.
    pub fn begin_submit(&mut self, body: &str) -> Result<SubmitTicket, MutationError> {
        let body = body.trim();
        let len = body.chars().count();
        if len < self.config.min_body_chars {
            return Err(MutationError::BodyTooShort {
                len,
                min: self.config.min_body_chars,
            });
        }
        if self.in_flight.contains_key(&self.subject) {
            return Err(MutationError::SubmitInFlight {
                subject: self.subject.clone(),
            });
        }

        let identity = self.identity();
        let now = self.clock.now_millis();
        let pending = CommentRecord {
            id: CommentId::pending(now, rand::random()),
            author_label: identity
                .display_name
                .unwrap_or_else(|| ANONYMOUS_LABEL.to_string()),
            body: body.to_string(),
            timestamp_ms: now,
            owner_token: identity.client_id,
            server_id: None,
        };

        self.records.insert(0, pending.clone());
        let evicted = retain_most_recent(&mut self.records, self.config.cache_capacity);
        self.cache.save(&self.subject, &self.records);
        self.in_flight
            .insert(self.subject.clone(), pending.id.clone());

        debug!(subject = %self.subject, pending = %pending.id, "optimistic comment inserted");
        Ok(SubmitTicket {
            subject: self.subject.clone(),
            pending,
            evicted,
        })
    }

    /// Apply the outcome of the remote create for `ticket`.
    ///
    /// Failure rolls the optimistic insert back and returns the error.
    /// Success caches any revealed author name and reconciles; a failed
    /// reconciliation fetch is reported as [`ReconcileOutcome::Deferred`],
    /// not as an error, since the comment itself was created.
    pub fn finish_submit(
        &mut self,
        ticket: SubmitTicket,
        result: Result<CreatedComment, RemoteError>,
    ) -> Result<SubmitReport, MutationError> {
        self.in_flight.remove(&ticket.subject);

        let created = match result {
            Ok(created) => created,
            Err(err) => {
                warn!(subject = %ticket.subject, error = %err, "comment create failed; rolling back");
                self.rollback_submit(&ticket);
                return Err(err.into());
            }
        };

        let pending = ticket.pending.clone().with_server_id(created.id.clone());
        self.with_subject_list(&ticket.subject, |records| {
            if let Some(record) = records.iter_mut().find(|record| record.id == pending.id) {
                record.server_id.clone_from(&pending.server_id);
            }
        });
        self.remember_author(created.author_label.as_deref());

        let outcome = if ticket.subject == self.subject {
            self.reconcile_after_submit(&pending)
                .unwrap_or_else(|error| ReconcileOutcome::Deferred { error })
        } else {
            debug!(subject = %ticket.subject, "create finished after subject change; ignoring");
            ReconcileOutcome::Stale
        };

        Ok(SubmitReport {
            pending_id: ticket.pending.id,
            server_id: created.id,
            outcome,
        })
    }

    /// Submit a comment: optimistic insert, remote create, reconciliation.
    pub fn submit(&mut self, body: &str) -> Result<SubmitReport, MutationError> {
        let ticket = self.begin_submit(body)?;
        let result = self
            .remote
            .create_comment(&ticket.subject, &ticket.pending.body);
        self.finish_submit(ticket, result)
    }

    fn rollback_submit(&mut self, ticket: &SubmitTicket) {
        self.with_subject_list(&ticket.subject, |records| {
            records.retain(|record| record.id != ticket.pending.id);
            for evicted in &ticket.evicted {
                if !records.iter().any(|record| record.id == evicted.id) {
                    records.push(evicted.clone());
                }
            }
        });
    }

    // -----------------------------------------------------------------------
    // Remove
    // -----------------------------------------------------------------------

    /// Check ownership, remove `id` from the list and persist.
    pub fn begin_remove(&mut self, id: &CommentId) -> Result<RemoveTicket, MutationError> {
        let Some(index) = self.records.iter().position(|record| &record.id == id) else {
            return Err(MutationError::NotFound { id: id.clone() });
        };
        if !self.identity().owns(&self.records[index]) {
            return Err(MutationError::NotPermitted { id: id.clone() });
        }
        if self.in_flight.get(&self.subject) == Some(id) {
            return Err(MutationError::SubmitInFlight {
                subject: self.subject.clone(),
            });
        }

        let removed = self.records.remove(index);
        self.cache.save(&self.subject, &self.records);
        debug!(subject = %self.subject, id = %removed.id, "optimistic removal");

        Ok(RemoveTicket {
            subject: self.subject.clone(),
            removed,
            index,
        })
    }

    /// Apply the outcome of the remote delete for `ticket`; failure puts the
    /// record back where it was.
    pub fn finish_remove(
        &mut self,
        ticket: RemoveTicket,
        result: Result<(), RemoteError>,
    ) -> Result<(), MutationError> {
        let Err(err) = result else {
            return Ok(());
        };

        warn!(subject = %ticket.subject, id = %ticket.removed.id, error = %err, "comment delete failed; restoring");
        self.with_subject_list(&ticket.subject, |records| {
            if !records.iter().any(|record| record.id == ticket.removed.id) {
                let index = ticket.index.min(records.len());
                records.insert(index, ticket.removed.clone());
            }
        });
        Err(err.into())
    }

    /// Remove a comment the current identity owns.
    pub fn remove(&mut self, id: &CommentId) -> Result<(), MutationError> {
        let ticket = self.begin_remove(id)?;
        let result = match ticket.remote_id() {
            Some(remote_id) => self.remote.delete_comment(remote_id),
            None => Ok(()),
        };
        self.finish_remove(ticket, result)
    }

    /// Edit the list of `subject` (in memory when current, else straight in
    /// the cache) and persist it.
    fn with_subject_list(&mut self, subject: &SubjectKey, edit: impl FnOnce(&mut Vec<CommentRecord>)) {
        if subject == &self.subject {
            edit(&mut self.records);
            self.cache.save(&self.subject, &self.records);
        } else {
            let mut records = self.cache.load(subject);
            edit(&mut records);
            self.cache.save(subject, &records);
        }
    }
}

impl std::fmt::Debug for CommentThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommentThread")
            .field("subject", &self.subject)
            .field("state", &self.state)
            .field("records", &self.records.len())
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}
