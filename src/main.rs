use anyhow::Result;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use std::path::PathBuf;

mod cmd;
mod utils;

use cmd::{
    CompleteArgs, CompletionArgs, EditArgs, ExportArgs, HistoryArgs, ImportArgs, ListArgs,
    RegisterArgs, RenameArgs, RunArgs, ShowArgs, StatsArgs, UnregisterArgs, ValidateArgs,
};
use tu::RouterError;
use tu::config::Settings;
use tu::options::OptionInvocation;

/// tu - register named commands and run them through one entry point
///
/// Command layout:
///   tu register <TARGET> [--name NAME] [--kind shell|module|callable] ...
///   tu <NAME> [ARGS]...              (same as `tu run <NAME> [ARGS]...`)
///   tu list [PATTERN] | show <NAME> | edit <NAME> ... | rename | unregister
///   tu history | export <PATH> | import <PATH> [--merge] | validate | stats
///
/// Run options (before the command name, applied in the order given):
///   -C / --chdir DIR       Working directory (relative paths stack)
///   -e / --env KEY=VALUE   Environment overlay (repeatable)
///   --timeout SECS         Kill the command after SECS seconds
///
/// Global flags / env:
///   -v / -vv               Increase verbosity
///   -q / --quiet           Errors only
///   --dry-run              Print what would run, launch nothing
///   --config / TU_CONFIG   Config file (TOML)
///   --registry / TU_REGISTRY_FILE
///
/// Examples:
///   tu register "make build" --name build
///   tu register "./deploy.sh" --name infra:deploy --depends-on build
///   tu -C /srv/app -e MODE=prod infra:deploy --force
///   tu --dry-run infra:deploy
#[derive(Parser, Debug)]
#[command(
    name = "tu",
    version,
    author,
    about = "tu - register named commands and run them through one entry point",
    propagate_version = true,
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Silence all non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Registry file to use instead of the configured one
    #[arg(long, global = true, value_name = "PATH")]
    registry: Option<PathBuf>,

    /// Show what would run without launching anything
    #[arg(long, global = true)]
    dry_run: bool,

    /// Working directory for the command (repeatable; relative paths stack)
    #[arg(short = 'C', long, visible_alias = "subshell", value_name = "DIR")]
    chdir: Vec<String>,

    /// Environment overlay for the command (repeatable KEY=VALUE)
    #[arg(short, long, value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Timeout in seconds for the command
    #[arg(long, value_name = "SECS")]
    timeout: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register a command under a name
    Register(RegisterArgs),

    /// Remove a registered command
    Unregister(UnregisterArgs),

    /// Give a registered command a new name
    Rename(RenameArgs),

    /// Change fields of a registered command
    Edit(EditArgs),

    /// List registered commands
    List(ListArgs),

    /// Show one registered command in detail
    Show(ShowArgs),

    /// Run a registered command (or a dotted module path)
    Run(RunArgs),

    /// Show or clear the run history
    History(HistoryArgs),

    /// Write the registry to a JSON or YAML file
    Export(ExportArgs),

    /// Load the registry from a JSON or YAML file
    Import(ImportArgs),

    /// Check that registered commands can run
    Validate(ValidateArgs),

    /// Registry statistics
    Stats(StatsArgs),

    /// Print a shell completion script
    Completion(CompletionArgs),

    /// Completion helper: names starting with a prefix
    #[command(hide = true)]
    Complete(CompleteArgs),

    /// `tu <NAME> [ARGS]...`
    #[command(external_subcommand)]
    External(Vec<String>),
}

/// Run options recovered in command-line order, across option kinds.
fn global_options(matches: &ArgMatches) -> Vec<OptionInvocation> {
    let mut found: Vec<(usize, OptionInvocation)> = Vec::new();
    for id in ["chdir", "env", "timeout"] {
        if let (Some(indices), Some(values)) =
            (matches.indices_of(id), matches.get_many::<String>(id))
        {
            found.extend(
                indices
                    .zip(values)
                    .map(|(idx, value)| (idx, OptionInvocation::new(id, value.clone()))),
            );
        }
    }
    found.sort_by_key(|(idx, _)| *idx);
    found.into_iter().map(|(_, inv)| inv).collect()
}

fn exit_code_of(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|e| e.downcast_ref::<RouterError>())
        .map_or(1, RouterError::exit_code)
}

fn run(cli: Cli, options: Vec<OptionInvocation>) -> Result<i32> {
    let level = utils::derive_level(cli.verbose, cli.quiet);
    utils::init_logging(level);

    // Scripts need no registry or config.
    if let Commands::Completion(args) = &cli.command {
        cmd::execute_completion(args)?;
        return Ok(0);
    }

    let settings = Settings::load(cli.config.as_deref(), cli.registry.as_deref())?;
    let ctx = cmd::Context::new(settings, cli.dry_run, options, cli.quiet);

    match cli.command {
        Commands::Register(args) => cmd::execute_register(args, &ctx).map(|_| 0),
        Commands::Unregister(args) => cmd::execute_unregister(args, &ctx).map(|_| 0),
        Commands::Rename(args) => cmd::execute_rename(args, &ctx).map(|_| 0),
        Commands::Edit(args) => cmd::execute_edit(args, &ctx).map(|_| 0),
        Commands::List(args) => cmd::execute_list(args, &ctx).map(|_| 0),
        Commands::Show(args) => cmd::execute_show(args, &ctx).map(|_| 0),
        Commands::Run(args) => cmd::execute_run(args, &ctx),
        Commands::History(args) => cmd::execute_history(args, &ctx).map(|_| 0),
        Commands::Export(args) => cmd::execute_export(args, &ctx).map(|_| 0),
        Commands::Import(args) => cmd::execute_import(args, &ctx).map(|_| 0),
        Commands::Validate(args) => cmd::execute_validate(args, &ctx),
        Commands::Stats(args) => cmd::execute_stats(args, &ctx).map(|_| 0),
        Commands::Complete(args) => cmd::execute_complete(args, &ctx).map(|_| 0),
        Commands::Completion(_) => Ok(0),
        Commands::External(mut words) => {
            if words.is_empty() {
                anyhow::bail!("missing command name");
            }
            let name = words.remove(0);
            cmd::execute_run(RunArgs { name, args: words }, &ctx)
        }
    }
}

fn main() {
    let matches = Cli::command().get_matches();
    let options = global_options(&matches);
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    let code = match run(cli, options) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("tu: {err:#}");
            exit_code_of(&err)
        }
    };
    std::process::exit(code);
}
