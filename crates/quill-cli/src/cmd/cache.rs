//! `ql cache` — inspect or clear a post's cached comments without the network.

use std::io::Write;

use clap::Args;
use serde::Serialize;

use super::{CommentRow, Context, SubjectArgs, comment_rows, write_rows};
use crate::output::{OutputMode, pretty_section, render};

#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(flatten)]
    pub subject: SubjectArgs,

    /// Drop the cached list for this post.
    #[arg(long)]
    pub clear: bool,
}

#[derive(Debug, Serialize)]
struct CacheOutput {
    subject: String,
    key: String,
    capacity: usize,
    cleared: bool,
    comments: Vec<CommentRow>,
}

pub fn run_cache(args: &CacheArgs, ctx: &Context) -> anyhow::Result<()> {
    let subject = args.subject.subject()?;
    let cache = ctx.cache()?;
    if args.clear {
        cache.clear(&subject);
    }

    let identity = ctx.identity_provider()?.identity();
    let result = CacheOutput {
        key: cache.key_for(&subject),
        subject: subject.to_string(),
        capacity: cache.capacity(),
        cleared: args.clear,
        comments: comment_rows(&cache.load(&subject), &identity),
    };

    render(ctx.output, &result, |r, w| {
        if r.cleared {
            writeln!(w, "✓ cleared cached comments for {}", r.subject)?;
            return Ok(());
        }
        if ctx.output == OutputMode::Pretty {
            pretty_section(
                w,
                &format!("Cached {} ({}/{})", r.key, r.comments.len(), r.capacity),
            )?;
        }
        write_rows(w, &r.comments, ctx.output)
    })
}
