//! `ql delete` — remove one of your own comments.

use std::io::Write;

use clap::Args;
use quill_core::model::CommentId;
use serde::Serialize;
use tracing::warn;

use super::{Context, SubjectArgs};
use crate::output::render;

#[derive(Args, Debug)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub subject: SubjectArgs,

    /// Comment id, as printed by `ql list`.
    pub id: String,
}

#[derive(Debug, Serialize)]
struct DeleteOutput {
    ok: bool,
    id: String,
    /// Pending comments the server never accepted are only removed locally.
    local_only: bool,
}

pub fn run_delete(args: &DeleteArgs, ctx: &Context) -> anyhow::Result<()> {
    let subject = args.subject.subject()?;
    let mut thread = ctx.open_thread(subject)?;
    if let Err(err) = thread.load() {
        warn!(error = %err, "deleting against cached comments");
    }

    let id = CommentId::new(args.id.trim());
    let local_only = thread
        .records()
        .iter()
        .find(|record| record.id == id)
        .is_some_and(|record| record.remote_id().is_none());
    thread.remove(&id)?;

    let result = DeleteOutput {
        ok: true,
        local_only,
        id: id.to_string(),
    };
    render(ctx.output, &result, |r, w| {
        if r.local_only {
            writeln!(w, "✓ removed pending comment {}", r.id)
        } else {
            writeln!(w, "✓ deleted comment {}", r.id)
        }
    })
}
