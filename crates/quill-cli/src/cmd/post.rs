//! `ql post` — submit a comment optimistically and report how it reconciled.

use std::io::Write;

use clap::Args;
use quill_core::ReconcileOutcome;
use serde::Serialize;
use tracing::{info, warn};

use super::{Context, SubjectArgs};
use crate::output::{pretty_kv, render};

#[derive(Args, Debug)]
pub struct PostArgs {
    #[command(flatten)]
    pub subject: SubjectArgs,

    /// Comment body.
    pub body: String,
}

#[derive(Debug, Serialize)]
struct PostOutput {
    ok: bool,
    subject: String,
    pending_id: String,
    server_id: String,
    /// `confirmed`, `unconfirmed`, `deferred` or `stale`.
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

fn describe(outcome: &ReconcileOutcome) -> (&'static str, Option<String>) {
    match outcome {
        ReconcileOutcome::Confirmed { id } => ("confirmed", Some(format!("listed as {id}"))),
        ReconcileOutcome::Unconfirmed => (
            "unconfirmed",
            Some("server has not listed it yet; kept as pending".to_string()),
        ),
        ReconcileOutcome::Deferred { error } => ("deferred", Some(error.to_string())),
        ReconcileOutcome::Stale => ("stale", None),
    }
}

pub fn run_post(args: &PostArgs, ctx: &Context) -> anyhow::Result<()> {
    let subject = args.subject.subject()?;
    let mut thread = ctx.open_thread(subject)?;

    // Merge first so pending comments from earlier runs can be folded.
    if let Err(err) = thread.load() {
        warn!(error = %err, "could not refresh comments before posting");
    }

    let report = thread.submit(&args.body)?;
    let (outcome, detail) = describe(&report.outcome);
    info!(server_id = %report.server_id, outcome, "comment posted");

    let result = PostOutput {
        ok: true,
        subject: thread.subject().to_string(),
        pending_id: report.pending_id.to_string(),
        server_id: report.server_id.to_string(),
        outcome,
        detail,
    };

    render(ctx.output, &result, |r, w| {
        writeln!(w, "✓ comment posted to {}", r.subject)?;
        pretty_kv(w, "id", &r.server_id)?;
        pretty_kv(w, "reconcile", r.outcome)?;
        if let Some(detail) = &r.detail {
            pretty_kv(w, "detail", detail)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::model::CommentId;
    use quill_core::remote::RemoteError;

    #[test]
    fn outcomes_have_stable_names() {
        let confirmed = ReconcileOutcome::Confirmed {
            id: CommentId::new("srv-1"),
        };
        assert_eq!(describe(&confirmed).0, "confirmed");
        assert_eq!(describe(&ReconcileOutcome::Unconfirmed).0, "unconfirmed");
        let deferred = ReconcileOutcome::Deferred {
            error: RemoteError::Transport("offline".into()),
        };
        assert_eq!(describe(&deferred), ("deferred", Some("transport error: offline".into())));
        assert_eq!(describe(&ReconcileOutcome::Stale), ("stale", None));
    }
}
