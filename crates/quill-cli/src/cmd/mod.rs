pub mod cache;
pub mod delete;
pub mod list;
pub mod name;
pub mod post;
pub mod whoami;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use clap::Args;
use quill_core::cache::CommentCache;
use quill_core::clock::SystemClock;
use quill_core::config::QuillConfig;
use quill_core::identity::{Identity, IdentityProvider};
use quill_core::model::{CommentRecord, SubjectKey};
use quill_core::store::FileStore;
use quill_core::{Collaborators, CommentThread};
use serde::Serialize;

use crate::http::HttpRemote;
use crate::output::{OutputMode, pretty_rule};

/// Which post's comments a command works on.
#[derive(Args, Debug, Clone, Default)]
pub struct SubjectArgs {
    /// Post id.
    #[arg(long, value_name = "ID")]
    pub post: Option<String>,

    /// Post slug, for posts whose id is unknown.
    #[arg(long, value_name = "SLUG")]
    pub slug: Option<String>,
}

impl SubjectArgs {
    pub fn subject(&self) -> anyhow::Result<SubjectKey> {
        SubjectKey::for_post(self.post.as_deref(), self.slug.as_deref())
            .context("missing subject: pass --post <ID> or --slug <SLUG>")
    }
}

/// Resolved configuration plus output mode, shared by every command.
#[derive(Debug)]
pub struct Context {
    pub config: QuillConfig,
    pub output: OutputMode,
}

impl Context {
    pub fn store(&self) -> anyhow::Result<Arc<FileStore>> {
        let dir = self.config.storage.resolved_dir();
        let store = FileStore::open(&dir)
            .with_context(|| format!("failed to open data dir {}", dir.display()))?;
        Ok(Arc::new(store))
    }

    pub fn namespace(&self) -> &str {
        &self.config.storage.namespace
    }

    pub fn identity_provider(&self) -> anyhow::Result<IdentityProvider> {
        Ok(IdentityProvider::new(
            self.store()?,
            Arc::new(SystemClock),
            self.namespace(),
        ))
    }

    pub fn cache(&self) -> anyhow::Result<CommentCache> {
        Ok(CommentCache::new(
            self.store()?,
            self.namespace(),
            self.config.engine.cache_capacity,
        ))
    }

    pub fn open_thread(&self, subject: SubjectKey) -> anyhow::Result<CommentThread> {
        let remote = Arc::new(HttpRemote::new(&self.config.api));
        let collaborators = Collaborators::new(self.store()?, remote);
        Ok(CommentThread::new(
            subject,
            collaborators,
            self.config.engine.clone(),
            self.namespace(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Comment rows
// ---------------------------------------------------------------------------

/// One comment as printed by `ql list` and `ql cache`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommentRow {
    pub id: String,
    pub author: String,
    pub body: String,
    pub ts: i64,
    pub time: String,
    pub pending: bool,
    pub mine: bool,
}

impl CommentRow {
    pub fn new(record: &CommentRecord, identity: &Identity) -> Self {
        Self {
            id: record.id.to_string(),
            author: record.author_label.clone(),
            body: record.body.clone(),
            ts: record.timestamp_ms,
            time: format_time(record.timestamp_ms),
            pending: record.is_pending(),
            mine: identity.owns(record),
        }
    }
}

pub fn comment_rows(records: &[CommentRecord], identity: &Identity) -> Vec<CommentRow> {
    records
        .iter()
        .map(|record| CommentRow::new(record, identity))
        .collect()
}

fn format_time(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map_or_else(|| ms.to_string(), |ts| ts.format("%Y-%m-%d %H:%M UTC").to_string())
}

fn markers(row: &CommentRow) -> String {
    let mut marks = Vec::new();
    if row.pending {
        marks.push("pending");
    }
    if row.mine {
        marks.push("mine");
    }
    if marks.is_empty() {
        String::new()
    } else {
        format!(" [{}]", marks.join(", "))
    }
}

/// Write rows for pretty or text output.
pub fn write_rows(w: &mut dyn Write, rows: &[CommentRow], mode: OutputMode) -> io::Result<()> {
    match mode {
        OutputMode::Text => {
            for row in rows {
                writeln!(
                    w,
                    "{}\t{}\t{}\t{}\t{}",
                    row.id,
                    row.time,
                    row.author,
                    markers(row).trim(),
                    row.body.replace('\n', " ")
                )?;
            }
        }
        OutputMode::Pretty | OutputMode::Json => {
            if rows.is_empty() {
                writeln!(w, "No comments yet.")?;
            }
            for row in rows {
                writeln!(w, "{} · {}{}", row.author, row.time, markers(row))?;
                for line in row.body.lines() {
                    writeln!(w, "  {line}")?;
                }
                writeln!(w, "  id: {}", row.id)?;
                pretty_rule(w)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            client_id: "me".into(),
            display_name: None,
        }
    }

    #[test]
    fn subject_prefers_post_id() {
        let args = SubjectArgs {
            post: Some("7".into()),
            slug: Some("hello".into()),
        };
        assert_eq!(args.subject().unwrap().as_str(), "post-7");

        let args = SubjectArgs {
            post: None,
            slug: Some("hello".into()),
        };
        assert_eq!(args.subject().unwrap().as_str(), "slug-hello");

        assert!(SubjectArgs::default().subject().is_err());
    }

    #[test]
    fn rows_mark_pending_and_owned() {
        let mut mine = CommentRecord::authoritative("srv-1", None, "hi there", 0);
        mine.owner_token = "me".into();
        let row = CommentRow::new(&mine, &identity());
        assert!(row.mine);
        assert!(!row.pending);
        assert_eq!(row.time, "1970-01-01 00:00 UTC");
        assert_eq!(markers(&row), " [mine]");
    }

    #[test]
    fn text_rows_are_tab_separated() {
        let record = CommentRecord::authoritative("srv-2", Some("Bob"), "two\nlines", 0);
        let rows = comment_rows(&[record], &identity());
        let mut buf = Vec::new();
        write_rows(&mut buf, &rows, OutputMode::Text).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "srv-2\t1970-01-01 00:00 UTC\tBob\t\ttwo lines\n"
        );
    }
}
