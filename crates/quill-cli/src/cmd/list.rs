//! `ql list` — fetch, merge and print a post's comments.

use std::io::Write;

use clap::Args;
use serde::Serialize;
use tracing::warn;

use super::{CommentRow, Context, SubjectArgs, comment_rows, write_rows};
use crate::output::{OutputMode, pretty_section, render};

#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub subject: SubjectArgs,
}

#[derive(Debug, Serialize)]
struct ListOutput {
    subject: String,
    /// False when the server could not be reached and the cached list is shown.
    synced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
    comments: Vec<CommentRow>,
}

pub fn run_list(args: &ListArgs, ctx: &Context) -> anyhow::Result<()> {
    let subject = args.subject.subject()?;
    let mut thread = ctx.open_thread(subject)?;

    let (synced, warning) = match thread.load() {
        Ok(_) => (true, None),
        Err(err) => {
            warn!(error = %err, "showing cached comments");
            (false, Some(err.to_string()))
        }
    };

    let identity = thread.identity();
    let result = ListOutput {
        subject: thread.subject().to_string(),
        synced,
        warning,
        comments: comment_rows(&thread.view(), &identity),
    };

    render(ctx.output, &result, |r, w| {
        if ctx.output == OutputMode::Pretty {
            pretty_section(w, &format!("Comments on {} ({})", r.subject, r.comments.len()))?;
            if let Some(warning) = &r.warning {
                writeln!(w, "offline, showing cached comments: {warning}")?;
            }
        }
        write_rows(w, &r.comments, ctx.output)
    })
}
