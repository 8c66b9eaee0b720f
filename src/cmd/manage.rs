/*!
`manage.rs`

Mutating subcommands other than `register`:
  - `tu unregister <NAME>`
  - `tu rename <OLD> <NEW> [--force-dot-name]`
  - `tu edit <NAME> [--description ..] [--add-tag ..] ...`

Each is one locked read-modify-write through the registry store, or a
preview of it under `--dry-run`. `NAME` may be an FQN or an alias.
*/

use std::num::NonZeroU64;

use anyhow::{Context as _, Result, bail};
use clap::Args;
use tu::registry::{self, CommandUpdate};

use crate::cmd::format::{Role, badge, color};
use crate::cmd::{Context, parse_env_pairs};

/* ---- unregister ---- */

#[derive(Args, Debug)]
pub struct UnregisterArgs {
    /// FQN or alias of the command to remove
    pub name: String,
}

pub fn execute_unregister(args: UnregisterArgs, ctx: &Context) -> Result<()> {
    let removed = ctx
        .mutate(|reg| registry::unregister(reg, &args.name))
        .with_context(|| format!("Failed to unregister '{}'", args.name))?;
    ctx.say_changed(format!(
        "{}Unregistered {}",
        badge("success", &ctx.style),
        color(Role::Bold, &removed.name, &ctx.style)
    ));
    Ok(())
}

/* ---- rename ---- */

#[derive(Args, Debug)]
pub struct RenameArgs {
    /// Current FQN or alias
    pub old: String,

    /// New FQN
    pub new: String,

    /// Accept a new name containing a dot
    #[arg(long)]
    pub force_dot_name: bool,
}

pub fn execute_rename(args: RenameArgs, ctx: &Context) -> Result<()> {
    let now = ctx.now();
    let renamed = ctx
        .mutate(|reg| registry::rename(reg, &args.old, &args.new, args.force_dot_name, now))
        .with_context(|| format!("Failed to rename '{}'", args.old))?;
    ctx.say_changed(format!(
        "{}Renamed {} -> {}",
        badge("success", &ctx.style),
        args.old,
        color(Role::Bold, &renamed.name, &ctx.style)
    ));
    Ok(())
}

/* ---- edit ---- */

#[derive(Args, Debug)]
pub struct EditArgs {
    /// FQN or alias of the command to change
    pub name: String,

    /// Set the description
    #[arg(long, conflicts_with = "clear_description")]
    pub description: Option<String>,

    /// Remove the description
    #[arg(long)]
    pub clear_description: bool,

    /// Add a tag (repeatable)
    #[arg(long = "add-tag", value_name = "TAG")]
    pub add_tags: Vec<String>,

    /// Remove a tag (repeatable)
    #[arg(long = "remove-tag", value_name = "TAG")]
    pub remove_tags: Vec<String>,

    /// Add an alias (repeatable)
    #[arg(long = "add-alias", value_name = "NAME")]
    pub add_aliases: Vec<String>,

    /// Remove an alias (repeatable)
    #[arg(long = "remove-alias", value_name = "NAME")]
    pub remove_aliases: Vec<String>,

    /// Replace the dependency list (repeatable, in order)
    #[arg(long = "depends-on", value_name = "NAME", conflicts_with = "clear_depends")]
    pub depends_on: Vec<String>,

    /// Remove all dependencies
    #[arg(long)]
    pub clear_depends: bool,

    /// Set the timeout in seconds
    #[arg(long, value_name = "SECS", conflicts_with = "clear_timeout")]
    pub timeout: Option<NonZeroU64>,

    /// Remove the timeout
    #[arg(long)]
    pub clear_timeout: bool,

    /// Set an environment overlay entry (repeatable KEY=VALUE)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub set_env: Vec<String>,

    /// Remove an environment overlay entry (repeatable)
    #[arg(long = "unset-env", value_name = "KEY")]
    pub unset_env: Vec<String>,

    /// Accept new aliases containing a dot
    #[arg(long)]
    pub force_dot_name: bool,
}

impl EditArgs {
    fn to_update(&self) -> Result<CommandUpdate> {
        let description = if self.clear_description {
            Some(None)
        } else {
            self.description.clone().map(Some)
        };
        let depends_on = if self.clear_depends {
            Some(Vec::new())
        } else if self.depends_on.is_empty() {
            None
        } else {
            Some(self.depends_on.clone())
        };
        let timeout_seconds = if self.clear_timeout {
            Some(None)
        } else {
            self.timeout.map(Some)
        };
        Ok(CommandUpdate {
            description,
            add_tags: self.add_tags.clone(),
            remove_tags: self.remove_tags.clone(),
            add_aliases: self.add_aliases.clone(),
            remove_aliases: self.remove_aliases.clone(),
            depends_on,
            timeout_seconds,
            set_env: parse_env_pairs(&self.set_env)?,
            unset_env: self.unset_env.clone(),
            allow_dotted_name: self.force_dot_name,
        })
    }
}

pub fn execute_edit(args: EditArgs, ctx: &Context) -> Result<()> {
    let changes = args.to_update()?;
    if changes.is_empty() {
        bail!("Nothing to change; see 'tu edit --help' for the available fields");
    }
    let now = ctx.now();
    let updated = ctx
        .mutate(|reg| registry::update(reg, &args.name, changes, now))
        .with_context(|| format!("Failed to edit '{}'", args.name))?;
    ctx.say_changed(format!(
        "{}Updated {}",
        badge("success", &ctx.style),
        color(Role::Bold, &updated.name, &ctx.style)
    ));
    Ok(())
}
