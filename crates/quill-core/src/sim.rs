//! Deterministic in-process comment server with fault injection.
//!
//! [`SimulatedRemote`] implements [`RemoteComments`] over an in-memory map.
//! It can fail the next N calls of each kind, hide freshly created comments
//! from the next N list calls (the replication lag the post-submit retry
//! exists for), attribute creates to a fixed author, and skew server
//! timestamps against the client clock.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::model::{CommentId, CommentRecord, SubjectKey};
use crate::remote::{CreatedComment, RemoteComments, RemoteError};

/// Fault injection knobs. Counters are consumed as calls happen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultPlan {
    /// Number of upcoming list calls that fail.
    pub fail_lists: u32,
    /// Number of upcoming create calls that fail.
    pub fail_creates: u32,
    /// Number of upcoming delete calls that fail.
    pub fail_deletes: u32,
    /// Number of list calls for which a newly created comment stays hidden.
    pub hide_new_for_lists: u32,
    /// Offset added to the client clock for server timestamps.
    pub clock_skew_ms: i64,
    /// Author name attributed to created comments.
    pub author_label: Option<String>,
}

/// Per-kind call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub lists: u32,
    pub creates: u32,
    pub deletes: u32,
}

#[derive(Debug)]
struct Hidden {
    subject: SubjectKey,
    id: CommentId,
    remaining_lists: u32,
}

#[derive(Debug, Default)]
struct State {
    threads: BTreeMap<SubjectKey, Vec<CommentRecord>>,
    hidden: Vec<Hidden>,
    faults: FaultPlan,
    calls: CallCounts,
    next_id: u64,
}

fn take_fault(counter: &mut u32) -> bool {
    if *counter == 0 {
        return false;
    }
    *counter -= 1;
    true
}

/// In-memory comment server.
pub struct SimulatedRemote {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl SimulatedRemote {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the fault plan.
    pub fn set_faults(&self, faults: FaultPlan) {
        self.lock().faults = faults;
    }

    /// Edit the fault plan in place.
    pub fn with_faults(&self, edit: impl FnOnce(&mut FaultPlan)) {
        edit(&mut self.lock().faults);
    }

    /// Insert a comment as if another client had posted it.
    pub fn seed(&self, subject: &SubjectKey, record: CommentRecord) {
        self.lock()
            .threads
            .entry(subject.clone())
            .or_default()
            .push(record);
    }

    /// Everything the server holds for `subject`, hidden comments included.
    #[must_use]
    pub fn comments(&self, subject: &SubjectKey) -> Vec<CommentRecord> {
        self.lock()
            .threads
            .get(subject)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }
}

impl RemoteComments for SimulatedRemote {
    fn list_comments(&self, subject: &SubjectKey) -> Result<Vec<CommentRecord>, RemoteError> {
        let mut state = self.lock();
        state.calls.lists += 1;
        if take_fault(&mut state.faults.fail_lists) {
            return Err(RemoteError::Transport("simulated list failure".to_string()));
        }

        let hidden_ids: Vec<CommentId> = state
            .hidden
            .iter()
            .filter(|hidden| &hidden.subject == subject)
            .map(|hidden| hidden.id.clone())
            .collect();
        for hidden in state.hidden.iter_mut().filter(|h| &h.subject == subject) {
            hidden.remaining_lists = hidden.remaining_lists.saturating_sub(1);
        }
        state.hidden.retain(|hidden| hidden.remaining_lists > 0);

        Ok(state
            .threads
            .get(subject)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| !hidden_ids.contains(&record.id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn create_comment(
        &self,
        subject: &SubjectKey,
        body: &str,
    ) -> Result<CreatedComment, RemoteError> {
        let now = self.clock.now_millis();
        let mut state = self.lock();
        state.calls.creates += 1;
        if take_fault(&mut state.faults.fail_creates) {
            return Err(RemoteError::Status {
                status: 503,
                message: "simulated create failure".to_string(),
            });
        }

        let id = CommentId::new(format!("srv-{}", state.next_id));
        state.next_id += 1;
        let timestamp_ms = now.saturating_add(state.faults.clock_skew_ms);
        let author_label = state.faults.author_label.clone();

        let record = CommentRecord::authoritative(
            id.as_str(),
            author_label.as_deref(),
            body.trim(),
            timestamp_ms,
        );
        state
            .threads
            .entry(subject.clone())
            .or_default()
            .push(record);

        if state.faults.hide_new_for_lists > 0 {
            let remaining_lists = state.faults.hide_new_for_lists;
            state.hidden.push(Hidden {
                subject: subject.clone(),
                id: id.clone(),
                remaining_lists,
            });
        }

        Ok(CreatedComment {
            id,
            author_label,
            timestamp_ms,
        })
    }

    fn delete_comment(&self, id: &CommentId) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.calls.deletes += 1;
        if take_fault(&mut state.faults.fail_deletes) {
            return Err(RemoteError::Transport("simulated delete failure".to_string()));
        }

        let mut found = false;
        for records in state.threads.values_mut() {
            let before = records.len();
            records.retain(|record| &record.id != id);
            found |= records.len() != before;
        }
        if found {
            Ok(())
        } else {
            Err(RemoteError::Status {
                status: 404,
                message: format!("comment {id} not found"),
            })
        }
    }
}

impl std::fmt::Debug for SimulatedRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedRemote")
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn remote() -> SimulatedRemote {
        SimulatedRemote::new(Arc::new(ManualClock::new(10_000)))
    }

    #[test]
    fn create_then_list() {
        let remote = remote();
        let subject = SubjectKey::new("post-1");
        let created = remote.create_comment(&subject, " hello world ").unwrap();
        assert_eq!(created.id.as_str(), "srv-1");
        assert_eq!(created.timestamp_ms, 10_000);

        let listed = remote.list_comments(&subject).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].body, "hello world");
        assert_eq!(listed[0].owner_token, "");
        assert!(remote.list_comments(&SubjectKey::new("post-2")).unwrap().is_empty());
    }

    #[test]
    fn failures_are_consumed() {
        let remote = remote();
        let subject = SubjectKey::new("post-1");
        remote.with_faults(|faults| {
            faults.fail_creates = 1;
            faults.fail_lists = 1;
        });

        assert!(remote.create_comment(&subject, "hey you").is_err());
        assert!(remote.create_comment(&subject, "hey you").is_ok());
        assert!(remote.list_comments(&subject).is_err());
        assert_eq!(remote.list_comments(&subject).unwrap().len(), 1);
        assert_eq!(
            remote.calls(),
            CallCounts {
                lists: 2,
                creates: 2,
                deletes: 0
            }
        );
    }

    #[test]
    fn new_comments_can_lag_behind_lists() {
        let remote = remote();
        let subject = SubjectKey::new("post-1");
        remote.with_faults(|faults| faults.hide_new_for_lists = 1);

        remote.create_comment(&subject, "lagging").unwrap();
        assert!(remote.list_comments(&subject).unwrap().is_empty());
        assert_eq!(remote.list_comments(&subject).unwrap().len(), 1);
    }

    #[test]
    fn delete_unknown_is_404() {
        let remote = remote();
        let err = remote.delete_comment(&CommentId::new("nope")).unwrap_err();
        assert!(matches!(err, RemoteError::Status { status: 404, .. }));
    }

    #[test]
    fn author_and_skew_are_applied() {
        let remote = remote();
        remote.set_faults(FaultPlan {
            author_label: Some("Ana".into()),
            clock_skew_ms: 5,
            ..FaultPlan::default()
        });
        let created = remote.create_comment(&SubjectKey::new("p"), "skewed").unwrap();
        assert_eq!(created.author_label.as_deref(), Some("Ana"));
        assert_eq!(created.timestamp_ms, 10_005);
    }
}
