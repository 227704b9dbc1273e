//! `ql name` — set, clear or show the cached display name.
//!
//! The display name decides ownership of comments whose owner token is
//! unknown, such as those posted from another device.

use clap::Args;
use quill_core::model::{ANONYMOUS_LABEL, labels_match};
use serde::Serialize;

use super::Context;
use crate::output::{pretty_kv, render};

#[derive(Args, Debug)]
pub struct NameArgs {
    /// New display name. Omit to show the current one.
    pub name: Option<String>,

    /// Forget the cached display name.
    #[arg(long, conflicts_with = "name")]
    pub clear: bool,
}

#[derive(Debug, Serialize)]
struct NameOutput {
    display_name: Option<String>,
}

pub fn run_name(args: &NameArgs, ctx: &Context) -> anyhow::Result<()> {
    let provider = ctx.identity_provider()?;
    if args.clear {
        provider.set_cached_display_name(None);
    } else if let Some(name) = args.name.as_deref() {
        if name.trim().is_empty() {
            anyhow::bail!("display name must not be blank; use --clear to remove it");
        }
        if labels_match(name, ANONYMOUS_LABEL) {
            anyhow::bail!("\"{ANONYMOUS_LABEL}\" is reserved for unnamed comments; use --clear to post anonymously");
        }
        provider.set_cached_display_name(Some(name));
    }

    let result = NameOutput {
        display_name: provider.cached_display_name(),
    };
    render(ctx.output, &result, |r, w| {
        pretty_kv(w, "name", r.display_name.as_deref().unwrap_or("(anonymous)"))
    })
}
