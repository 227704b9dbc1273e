#![forbid(unsafe_code)]

mod cmd;
mod http;
mod output;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use output::{CliError, ConfigError, OutputMode, render_error};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "quill: optimistic comments for blog posts",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Config file to use instead of the user config (or `QUILL_CONFIG`).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Read",
        about = "List a post's comments",
        long_about = "Fetch a post's comments, merge them with locally cached and pending ones, and print them newest first.",
        after_help = "EXAMPLES:\n    # Comments on post 42\n    ql list --post 42\n\n    # By slug when the id is unknown\n    ql list --slug hello-world\n\n    # Emit machine-readable output\n    ql list --post 42 --json"
    )]
    List(cmd::list::ListArgs),

    #[command(
        next_help_heading = "Write",
        about = "Post a comment",
        long_about = "Post a comment. It is cached as pending immediately and replaced by the server copy once the server lists it.",
        after_help = "EXAMPLES:\n    # Post a comment\n    ql post --post 42 \"Great write-up\"\n\n    # Emit machine-readable output\n    ql post --post 42 \"Great write-up\" --json"
    )]
    Post(cmd::post::PostArgs),

    #[command(
        next_help_heading = "Write",
        about = "Delete one of your comments",
        long_about = "Delete a comment you own. The comment disappears locally first and is restored if the server refuses.",
        after_help = "EXAMPLES:\n    # Delete a comment\n    ql delete --post 42 c_81f2\n\n    # Emit machine-readable output\n    ql delete --post 42 c_81f2 --json"
    )]
    Delete(cmd::delete::DeleteArgs),

    #[command(
        next_help_heading = "Identity",
        about = "Show the local comment identity",
        after_help = "EXAMPLES:\n    ql whoami\n    ql whoami --json"
    )]
    Whoami(cmd::whoami::WhoamiArgs),

    #[command(
        next_help_heading = "Identity",
        about = "Set, clear or show the cached display name",
        after_help = "EXAMPLES:\n    # Claim comments posted as Ana on other devices\n    ql name Ana\n\n    # Forget the name\n    ql name --clear"
    )]
    Name(cmd::name::NameArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Inspect or clear cached comments",
        long_about = "Show a post's cached comment list without touching the network, or clear it.",
        after_help = "EXAMPLES:\n    # Show the cache for post 42\n    ql cache --post 42\n\n    # Clear it\n    ql cache --post 42 --clear"
    )]
    Cache(cmd::cache::CacheArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("QUILL_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "quill=debug,info"
        } else {
            "quill=info,warn"
        })
    });

    let format = env::var("QUILL_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: &Cli, output: OutputMode) -> anyhow::Result<()> {
    let config = quill_core::config::resolve_config(cli.config.as_deref()).context(ConfigError)?;
    debug!(base_url = %config.api.base_url, namespace = %config.storage.namespace, "resolved config");
    let ctx = cmd::Context { config, output };

    match &cli.command {
        Commands::List(args) => cmd::list::run_list(args, &ctx),
        Commands::Post(args) => cmd::post::run_post(args, &ctx),
        Commands::Delete(args) => cmd::delete::run_delete(args, &ctx),
        Commands::Whoami(args) => cmd::whoami::run_whoami(args, &ctx),
        Commands::Name(args) => cmd::name::run_name(args, &ctx),
        Commands::Cache(args) => cmd::cache::run_cache(args, &ctx),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    quill_core::init();

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let output = output::resolve_output_mode(cli.json);
    match run(&cli, output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let _ = render_error(output, &CliError::from_anyhow(&err));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn json_flag_parses_after_subcommand() {
        let cli = Cli::parse_from(["ql", "whoami", "--json"]);
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Whoami(_)));
    }

    #[test]
    fn post_takes_subject_and_body() {
        let cli = Cli::parse_from(["ql", "post", "--slug", "hello", "nice post"]);
        let Commands::Post(args) = cli.command else {
            unreachable!("`ql post` parses to Commands::Post");
        };
        assert_eq!(args.body, "nice post");
        assert_eq!(args.subject.slug.as_deref(), Some("hello"));
    }

    #[test]
    fn name_rejects_value_with_clear() {
        assert!(Cli::try_parse_from(["ql", "name", "Ana", "--clear"]).is_err());
    }
}
