/*!
`register.rs`

`tu register <TARGET> [--name NAME] [--kind KIND] ...`

Kind and name are inferred from the target when omitted. A dotted name needs
`--force-dot-name`; on a terminal the user is asked instead. With
`--dry-run` every check runs and nothing is saved.

JSON Output Shape:
{ "status": "ok", "command": { "name": "...", "kind": "...", ... } }
*/

use std::num::NonZeroU64;

use anyhow::{Context as _, Result};
use clap::Args;
use tu::RouterError;
use tu::model::CommandKind;
use tu::registry::{self, RegisterRequest};

use crate::cmd::format::{Role, badge, color};
use crate::cmd::list::command_json;
use crate::cmd::{Context, parse_env_pairs};
use crate::utils::term;

#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Shell command line, module path (pkg.mod) or callable (pkg.mod:func)
    pub target: String,

    /// Name to register under (derived from the target when omitted)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Target kind (inferred when omitted)
    #[arg(short, long, value_enum)]
    pub kind: Option<CommandKind>,

    /// Human description
    #[arg(short, long)]
    pub description: Option<String>,

    /// Tag (repeatable)
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Alternate name (repeatable)
    #[arg(long = "alias", value_name = "NAME")]
    pub aliases: Vec<String>,

    /// Command to run first (repeatable, in order)
    #[arg(long = "depends-on", value_name = "NAME")]
    pub depends_on: Vec<String>,

    /// Timeout in seconds
    #[arg(long = "timeout", value_name = "SECS")]
    pub timeout: Option<NonZeroU64>,

    /// Environment overlay entry (repeatable KEY=VALUE)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Accept a name containing a dot without asking
    #[arg(long)]
    pub force_dot_name: bool,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute_register(args: RegisterArgs, ctx: &Context) -> Result<()> {
    let mut request = RegisterRequest::new(args.target.clone());
    request.name = args.name.clone();
    request.kind = args.kind;
    request.description = args.description.clone();
    request.tags = args.tags.clone();
    request.aliases = args.aliases.clone();
    request.depends_on = args.depends_on.clone();
    request.timeout_seconds = args.timeout;
    request.env = parse_env_pairs(&args.env)?;
    request.allow_dotted_name = args.force_dot_name;

    let now = ctx.now();
    let attempt = ctx.mutate(|reg| registry::register(reg, request.clone(), now));

    let cmd = match attempt {
        Err(RouterError::DottedNameConfirmationRequired(name)) if term::stdin_is_terminal() && !args.json => {
            eprintln!(
                "{}Name '{name}' contains a dot, which shadows the dotted-name module rule.",
                badge("warn", &ctx.style)
            );
            eprintln!("The registered command will take precedence over running '{name}' as a module.");
            if !term::confirm("Continue?").context("Failed to read confirmation")? {
                ctx.say("Registration cancelled.");
                return Ok(());
            }
            request.allow_dotted_name = true;
            ctx.mutate(|reg| registry::register(reg, request, now))
                .context("Failed to register command")?
        }
        other => other.context("Failed to register command")?,
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "status": "ok",
                "command": command_json(&cmd)?,
            }))?
        );
    } else {
        ctx.say_changed(format!(
            "{}Registered {} ({}): {}",
            badge("success", &ctx.style),
            color(Role::Bold, &cmd.name, &ctx.style),
            cmd.kind,
            cmd.target
        ));
    }
    Ok(())
}
