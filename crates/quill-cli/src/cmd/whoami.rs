//! `ql whoami` — show the local comment identity.

use clap::Args;
use serde::Serialize;

use super::Context;
use crate::output::{pretty_kv, render};

#[derive(Args, Debug)]
pub struct WhoamiArgs {}

#[derive(Debug, Serialize)]
struct WhoamiOutput {
    client_id: String,
    display_name: Option<String>,
}

pub fn run_whoami(_args: &WhoamiArgs, ctx: &Context) -> anyhow::Result<()> {
    let identity = ctx.identity_provider()?.identity();
    let result = WhoamiOutput {
        client_id: identity.client_id,
        display_name: identity.display_name,
    };

    render(ctx.output, &result, |r, w| {
        pretty_kv(w, "client", &r.client_id)?;
        pretty_kv(w, "name", r.display_name.as_deref().unwrap_or("(anonymous)"))
    })
}
