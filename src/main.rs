use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use covdelta::cli::{self, Builds, Style, ViewKind};
use covdelta::diff::{self, DiffSource, GitDiff, StdinDiff};
use covdelta::edit::CodeDelta;

/// covdelta: find lines whose coverage changed although their code did not.
#[derive(Parser)]
#[command(name = "covdelta", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Inputs shared by every command.
#[derive(Args)]
struct Inputs {
    /// JSON coverage snapshot of the current build.
    #[arg(long)]
    current: PathBuf,

    /// JSON coverage snapshot of the reference build.
    #[arg(long)]
    reference: PathBuf,

    /// Git diff arguments, e.g. "main...HEAD", describing how the reference
    /// sources became the current ones.
    #[arg(long, conflicts_with = "stdin_diff")]
    git_diff: Option<String>,

    /// Read a unified diff from stdin instead of running git.
    #[arg(long)]
    stdin_diff: bool,

    /// Optional path prefix to prepend to diff paths for matching
    /// against coverage data paths.
    #[arg(long)]
    path_prefix: Option<String>,

    /// Name of the root node of the coverage tree.
    #[arg(long, default_value = "project")]
    root: String,

    /// Pretty-print JSON output.
    #[arg(long)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify coverage changes of every file.
    Classify {
        #[command(flatten)]
        inputs: Inputs,

        /// Output style.
        #[arg(long, value_enum, default_value = "json")]
        style: Style,
    },

    /// Print a pruned tree of the files worth reviewing.
    View {
        #[command(flatten)]
        inputs: Inputs,

        /// Which view to print.
        #[arg(long, value_enum)]
        view: ViewKind,
    },
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_env("COVDELTA_LOG").unwrap_or_else(|_| EnvFilter::new("off"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Obtain the diff between both builds, if one was requested.
fn load_delta(inputs: &Inputs) -> Result<Option<CodeDelta>> {
    let source: Box<dyn DiffSource> = match (&inputs.git_diff, inputs.stdin_diff) {
        (Some(args), _) => Box::new(GitDiff { args: args.clone() }),
        (None, true) => Box::new(StdinDiff),
        (None, false) => return Ok(None),
    };
    let delta = source.code_delta()?;
    Ok(Some(match &inputs.path_prefix {
        Some(prefix) => diff::apply_path_prefix(delta, prefix),
        None => delta,
    }))
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let output = match &cli.command {
        Commands::Classify { inputs, style } => {
            let delta = load_delta(inputs)?;
            let builds = Builds {
                current: &inputs.current,
                reference: &inputs.reference,
                root: &inputs.root,
            };
            cli::cmd_classify(&builds, delta.as_ref(), *style, inputs.pretty)?
        }
        Commands::View { inputs, view } => {
            let delta = load_delta(inputs)?;
            let builds = Builds {
                current: &inputs.current,
                reference: &inputs.reference,
                root: &inputs.root,
            };
            cli::cmd_view(&builds, delta.as_ref(), *view, inputs.pretty)?
        }
    };
    print!("{output}");
    Ok(())
}
