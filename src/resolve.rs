//! Name resolution.
//!
//! Registered entries (by FQN or alias) always win. An unregistered name with a
//! dot falls back to a module invocation; anything else is an unknown command
//! carrying ranked suggestions.

use tracing::debug;

use crate::error::{Result, RouterError, Suggestions};
use crate::model::{CommandKind, ExecutionPlan, RegisteredCommand, Registry};
use crate::name;

/// Number of suggestions attached to `UnknownCommand` unless configured otherwise.
pub const DEFAULT_SUGGESTIONS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved<'a> {
    Registered(&'a RegisteredCommand),
    /// Unregistered dotted name, run as a module path.
    ModuleFallback(&'a str),
}

impl Resolved<'_> {
    /// FQN of the entry, or the module path for a fallback.
    pub fn name(&self) -> &str {
        match self {
            Resolved::Registered(cmd) => &cmd.name,
            Resolved::ModuleFallback(module) => module,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Resolved::ModuleFallback(_))
    }
}

/// Resolve with the default number of suggestions.
pub fn resolve<'a>(registry: &'a Registry, input: &'a str) -> Result<Resolved<'a>> {
    resolve_with(registry, input, DEFAULT_SUGGESTIONS)
}

pub fn resolve_with<'a>(
    registry: &'a Registry,
    input: &'a str,
    max_suggestions: usize,
) -> Result<Resolved<'a>> {
    if let Some(cmd) = registry.get(input) {
        debug!(input, fqn = %cmd.name, "resolved registered command");
        return Ok(Resolved::Registered(cmd));
    }
    if name::is_dotted(input) {
        debug!(input, "no registered entry, using module fallback");
        return Ok(Resolved::ModuleFallback(input));
    }
    Err(RouterError::UnknownCommand {
        name: input.to_string(),
        suggestions: Suggestions(suggest(registry, input, max_suggestions)),
    })
}

/// Registered FQNs and aliases close to `input`, nearest first, ties in lexical
/// order. Candidates further than `max(2, len / 2)` edits are left out.
pub fn suggest(registry: &Registry, input: &str, limit: usize) -> Vec<String> {
    let cutoff = (input.chars().count() / 2).max(2);
    let mut ranked: Vec<(usize, &str)> = registry
        .all_names()
        .map(|candidate| (strsim::levenshtein(input, candidate), candidate))
        .filter(|(distance, _)| *distance <= cutoff)
        .collect();
    ranked.sort();
    ranked.dedup_by(|a, b| a.1 == b.1);
    ranked
        .into_iter()
        .take(limit)
        .map(|(_, name)| name.to_string())
        .collect()
}

/// Base execution plan for a resolved target; global options refine it later.
pub fn plan_for(resolved: &Resolved<'_>, args: &[String]) -> ExecutionPlan {
    match resolved {
        Resolved::Registered(cmd) => plan_for_command(cmd, args),
        Resolved::ModuleFallback(module) => {
            let mut plan = ExecutionPlan::new(*module, CommandKind::Module, *module);
            plan.argv = args.to_vec();
            plan
        }
    }
}

pub fn plan_for_command(cmd: &RegisteredCommand, args: &[String]) -> ExecutionPlan {
    let mut plan = ExecutionPlan::new(&cmd.name, cmd.kind, &cmd.target);
    plan.argv = args.to_vec();
    plan.env_overlay = cmd.env_overlay.clone();
    plan.timeout_seconds = cmd.timeout_seconds;
    plan
}
