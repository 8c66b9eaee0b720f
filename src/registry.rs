//! Registry service: CRUD over registered commands.
//!
//! Every operation is a value transformation `(Registry, request) -> Registry`
//! (plus whatever the caller needs back). Persistence is the store's job; the
//! CLI wraps these calls in [`RegistryStore::update`](crate::store::RegistryStore::update).

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroU64;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{Cycle, Result, RouterError};
use crate::model::{CommandKind, RegisteredCommand, Registry, namespace_of};
use crate::name::{self, Validation};

/* ---- Requests ---- */

/// Everything a caller may supply when registering a command.
#[derive(Debug, Clone, Default)]
pub struct RegisterRequest {
    pub target: String,
    /// Inferred from the target when absent.
    pub kind: Option<CommandKind>,
    /// Derived from the target when absent.
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub aliases: Vec<String>,
    pub depends_on: Vec<String>,
    pub timeout_seconds: Option<NonZeroU64>,
    pub env: Vec<(String, String)>,
    /// Explicit confirmation for names containing a dot.
    pub allow_dotted_name: bool,
}

impl RegisterRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn kind(mut self, kind: CommandKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }
}

/// Explicit field updates applied by [`update`].
#[derive(Debug, Clone, Default)]
pub struct CommandUpdate {
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub add_tags: Vec<String>,
    pub remove_tags: Vec<String>,
    pub add_aliases: Vec<String>,
    pub remove_aliases: Vec<String>,
    /// Replaces the whole list when present.
    pub depends_on: Option<Vec<String>>,
    /// `Some(None)` clears the timeout.
    pub timeout_seconds: Option<Option<NonZeroU64>>,
    pub set_env: Vec<(String, String)>,
    pub unset_env: Vec<String>,
    pub allow_dotted_name: bool,
}

impl CommandUpdate {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.add_tags.is_empty()
            && self.remove_tags.is_empty()
            && self.add_aliases.is_empty()
            && self.remove_aliases.is_empty()
            && self.depends_on.is_none()
            && self.timeout_seconds.is_none()
            && self.set_env.is_empty()
            && self.unset_env.is_empty()
    }
}

/// Narrowing applied by [`list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Case-insensitive substring over FQN and aliases.
    pub pattern: Option<String>,
    pub kind: Option<CommandKind>,
    pub tag: Option<String>,
}

impl ListFilter {
    fn matches(&self, cmd: &RegisteredCommand) -> bool {
        if let Some(kind) = self.kind
            && cmd.kind != kind
        {
            return false;
        }
        if let Some(tag) = &self.tag
            && !cmd.tags.contains(tag)
        {
            return false;
        }
        match &self.pattern {
            None => true,
            Some(p) => {
                let p = p.to_lowercase();
                cmd.name.to_lowercase().contains(&p)
                    || cmd.aliases.iter().any(|a| a.to_lowercase().contains(&p))
            }
        }
    }
}

/* ---- Kind inference / name derivation ---- */

const SCRIPT_EXTENSIONS: &[&str] = &[
    "sh", "bash", "zsh", "fish", "py", "pl", "rb", "js", "exe", "bat", "cmd", "ps1",
];

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_module_path(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_identifier)
}

fn has_path_separator(s: &str) -> bool {
    s.contains('/') || s.contains('\\')
}

/// Guess the kind of a target when the caller did not say.
///
/// - `pkg.mod:func` (one colon, no whitespace or path separators) -> callable
/// - `pkg.mod` (dotted identifiers, not a script file name) -> module
/// - anything else -> shell
pub fn infer_kind(target: &str) -> CommandKind {
    let t = target.trim();
    if t.contains(char::is_whitespace) || has_path_separator(t) {
        return CommandKind::Shell;
    }
    if let Some((module, func)) = t.split_once(':') {
        if !func.contains(':') && is_module_path(module) && is_identifier(func) {
            return CommandKind::Callable;
        }
        return CommandKind::Shell;
    }
    if t.contains('.') && is_module_path(t) {
        let last = t.rsplit('.').next().unwrap_or_default();
        if !SCRIPT_EXTENSIONS.contains(&last.to_ascii_lowercase().as_str()) {
            return CommandKind::Module;
        }
    }
    CommandKind::Shell
}

/// Derive the default FQN for a target. Derived names never contain a colon.
pub fn derive_name(target: &str, kind: CommandKind) -> Result<String> {
    let t = target.trim();
    let raw = match kind {
        CommandKind::Module => t.rsplit('.').next().unwrap_or(t).to_string(),
        CommandKind::Callable => t.rsplit(':').next().unwrap_or(t).to_string(),
        CommandKind::Shell => {
            let first = shell_words::split(t)
                .ok()
                .and_then(|words| words.into_iter().next())
                .or_else(|| t.split_whitespace().next().map(str::to_string))
                .unwrap_or_default();
            if has_path_separator(&first) {
                let normalized = first.replace('\\', "/");
                Path::new(&normalized)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            } else {
                first
            }
        }
    };
    let derived = raw.replace(':', "_");
    if derived.is_empty() {
        return Err(RouterError::InvalidRequest(format!(
            "cannot derive a command name from target '{target}'; pass an explicit name"
        )));
    }
    Ok(derived)
}

fn check_target(target: &str, kind: CommandKind) -> Result<()> {
    if target.is_empty() {
        return Err(RouterError::InvalidRequest("target cannot be empty".into()));
    }
    match kind {
        CommandKind::Shell => shell_words::split(target)
            .map(|_| ())
            .map_err(|e| RouterError::InvalidRequest(format!("cannot parse shell target: {e}"))),
        CommandKind::Module if is_module_path(target) => Ok(()),
        CommandKind::Module => Err(RouterError::InvalidRequest(format!(
            "module target '{target}' must be a dotted path of identifiers"
        ))),
        CommandKind::Callable => match target.rsplit_once(':') {
            Some((module, func)) if !module.is_empty() && is_identifier(func) => Ok(()),
            _ => Err(RouterError::InvalidRequest(format!(
                "callable target '{target}' must look like module:function"
            ))),
        },
    }
}

fn check_env(env: &[(String, String)]) -> Result<()> {
    for (k, _) in env {
        if k.is_empty() || k.contains('=') || k.contains('\0') {
            return Err(RouterError::InvalidRequest(format!(
                "invalid environment variable name '{k}'"
            )));
        }
    }
    Ok(())
}

fn check_dependencies(owner: &str, aliases: &BTreeSet<String>, deps: &[String]) -> Result<Vec<String>> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(deps.len());
    for dep in deps {
        let dep = dep.trim();
        if let Validation::InvalidSyntax { reason, .. } = name::validate(dep) {
            return Err(RouterError::invalid_name(dep, reason));
        }
        if dep == owner || aliases.contains(dep) {
            return Err(RouterError::CycleError(Cycle(vec![owner.to_string()])));
        }
        if seen.insert(dep.to_string()) {
            out.push(dep.to_string());
        }
    }
    Ok(out)
}

/// Reject `alias` if it is taken anywhere in the registry or equals `own_name`.
fn check_alias_free(registry: &Registry, alias: &str, own_name: &str, allow_dotted: bool) -> Result<()> {
    name::check_registrable(alias, allow_dotted)?;
    if alias == own_name {
        return Err(RouterError::collision(alias, Some(own_name)));
    }
    if let Some(owner) = registry.owner_of(alias) {
        return Err(RouterError::collision(alias, Some(owner)));
    }
    Ok(())
}

/* ---- Operations ---- */

/// Register a new command. Never overwrites an existing FQN or alias.
pub fn register(
    mut registry: Registry,
    request: RegisterRequest,
    now: DateTime<Utc>,
) -> Result<(Registry, RegisteredCommand)> {
    let target = request.target.trim().to_string();
    let kind = request.kind.unwrap_or_else(|| infer_kind(&target));
    check_target(&target, kind)?;

    let fqn = match &request.name {
        Some(n) => n.trim().to_string(),
        None => derive_name(&target, kind)?,
    };
    name::check_registrable(&fqn, request.allow_dotted_name)?;
    if let Some(owner) = registry.owner_of(&fqn) {
        return Err(RouterError::collision(&fqn, Some(owner)));
    }

    let mut aliases = BTreeSet::new();
    for alias in &request.aliases {
        let alias = alias.trim();
        check_alias_free(&registry, alias, &fqn, request.allow_dotted_name)?;
        aliases.insert(alias.to_string());
    }

    let depends_on = check_dependencies(&fqn, &aliases, &request.depends_on)?;
    check_env(&request.env)?;

    let mut cmd = RegisteredCommand::new(&fqn, kind, target, now);
    cmd.description = request.description.filter(|d| !d.trim().is_empty());
    cmd.tags = request
        .tags
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    cmd.aliases = aliases;
    cmd.depends_on = depends_on;
    cmd.timeout_seconds = request.timeout_seconds;
    cmd.env_overlay = request.env.into_iter().collect();

    debug!(name = %fqn, kind = %cmd.kind, target = %cmd.target, "registering command");
    registry.commands.insert(fqn, cmd.clone());
    Ok((registry, cmd))
}

/// Remove a command (addressed by FQN or alias). Returns the removed entry.
pub fn unregister(mut registry: Registry, name: &str) -> Result<(Registry, RegisteredCommand)> {
    let fqn = registry
        .owner_of(name)
        .map(str::to_string)
        .ok_or_else(|| RouterError::NotFound(name.to_string()))?;
    let removed = registry
        .commands
        .remove(&fqn)
        .ok_or_else(|| RouterError::NotFound(name.to_string()))?;
    debug!(name = %fqn, "unregistered command");
    Ok((registry, removed))
}

/// Move an entry to a new FQN, keeping every other field.
pub fn rename(
    mut registry: Registry,
    old_name: &str,
    new_name: &str,
    allow_dotted_name: bool,
    now: DateTime<Utc>,
) -> Result<(Registry, RegisteredCommand)> {
    let old_fqn = registry
        .owner_of(old_name)
        .map(str::to_string)
        .ok_or_else(|| RouterError::NotFound(old_name.to_string()))?;
    let new_name = new_name.trim();
    name::check_registrable(new_name, allow_dotted_name)?;
    if let Some(owner) = registry.owner_of(new_name) {
        return Err(RouterError::NameCollision {
            name: new_name.to_string(),
            owner_note: if owner != new_name {
                format!(" (alias of '{owner}')")
            } else {
                String::new()
            },
            remedy: format!("Use 'tu unregister {owner}' to remove it first"),
        });
    }

    let Some(mut cmd) = registry.commands.remove(&old_fqn) else {
        return Err(RouterError::NotFound(old_name.to_string()));
    };
    cmd.name = new_name.to_string();
    cmd.updated_at = now;
    debug!(from = %old_fqn, to = %new_name, "renamed command");
    registry.commands.insert(cmd.name.clone(), cmd.clone());
    Ok((registry, cmd))
}

/// Apply explicit field updates to one entry.
pub fn update(
    mut registry: Registry,
    name: &str,
    changes: CommandUpdate,
    now: DateTime<Utc>,
) -> Result<(Registry, RegisteredCommand)> {
    let fqn = registry
        .owner_of(name)
        .map(str::to_string)
        .ok_or_else(|| RouterError::NotFound(name.to_string()))?;
    if changes.is_empty() {
        return Err(RouterError::InvalidRequest("no changes requested".into()));
    }

    for alias in &changes.add_aliases {
        check_alias_free(&registry, alias.trim(), &fqn, changes.allow_dotted_name)?;
    }
    check_env(&changes.set_env)?;

    let Some(cmd) = registry.commands.get_mut(&fqn) else {
        return Err(RouterError::NotFound(name.to_string()));
    };

    for alias in &changes.remove_aliases {
        if !cmd.aliases.remove(alias.trim()) {
            return Err(RouterError::InvalidRequest(format!(
                "'{alias}' is not an alias of '{fqn}'"
            )));
        }
    }
    cmd.aliases
        .extend(changes.add_aliases.iter().map(|a| a.trim().to_string()));

    if let Some(description) = changes.description {
        cmd.description = description.filter(|d| !d.trim().is_empty());
    }
    for tag in &changes.remove_tags {
        cmd.tags.remove(tag.trim());
    }
    cmd.tags.extend(
        changes
            .add_tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
    );
    if let Some(deps) = &changes.depends_on {
        cmd.depends_on = check_dependencies(&fqn, &cmd.aliases, deps)?;
    }
    if let Some(timeout) = changes.timeout_seconds {
        cmd.timeout_seconds = timeout;
    }
    for key in &changes.unset_env {
        cmd.env_overlay.remove(key);
    }
    for (k, v) in changes.set_env {
        cmd.env_overlay.insert(k, v);
    }
    cmd.updated_at = now;

    let updated = cmd.clone();
    debug!(name = %fqn, "updated command fields");
    Ok((registry, updated))
}

/// Look up an entry by FQN or alias.
pub fn get<'a>(registry: &'a Registry, name: &str) -> Option<&'a RegisteredCommand> {
    registry.get(name)
}

/// Entries matching `filter`, in FQN lexical order.
pub fn list<'a>(registry: &'a Registry, filter: &ListFilter) -> Vec<&'a RegisteredCommand> {
    registry.iter().filter(|c| filter.matches(c)).collect()
}

/// Group an ordered listing by namespace. Root-level names form the `""` group,
/// which sorts first; groups and their members stay in lexical order.
pub fn group_by_namespace<'a>(
    commands: &[&'a RegisteredCommand],
) -> Vec<(String, Vec<&'a RegisteredCommand>)> {
    let mut groups: BTreeMap<String, Vec<&RegisteredCommand>> = BTreeMap::new();
    for cmd in commands {
        groups
            .entry(namespace_of(&cmd.name).to_string())
            .or_default()
            .push(cmd);
    }
    groups.into_iter().collect()
}

/// Syntax check for every FQN and alias of a document read from outside the
/// store. Dotted names pass: they were confirmed when first registered.
pub fn check_document(document: &Registry) -> Result<()> {
    for cmd in document.iter() {
        for n in std::iter::once(&cmd.name).chain(cmd.aliases.iter()) {
            if let Validation::InvalidSyntax { reason, .. } = name::validate(n) {
                return Err(RouterError::invalid_name(n.clone(), reason));
            }
        }
    }
    Ok(())
}

/// Combine `incoming` into `registry`. Fails without changes if any incoming
/// name is malformed, or if any FQN or alias of an incoming entry is already
/// taken (or taken twice within `incoming`).
pub fn merge(mut registry: Registry, incoming: Registry) -> Result<Registry> {
    check_document(&incoming)?;
    let mut taken: BTreeMap<String, String> = registry
        .iter()
        .flat_map(|c| {
            std::iter::once(c.name.clone())
                .chain(c.aliases.iter().cloned())
                .map(move |n| (n, c.name.clone()))
        })
        .collect();

    let mut conflicts = BTreeSet::new();
    for cmd in incoming.iter() {
        for n in std::iter::once(&cmd.name).chain(cmd.aliases.iter()) {
            if taken.contains_key(n) {
                conflicts.insert(n.clone());
            } else {
                taken.insert(n.clone(), cmd.name.clone());
            }
        }
    }
    if !conflicts.is_empty() {
        let names: Vec<String> = conflicts.into_iter().collect();
        return Err(RouterError::NameCollision {
            name: names.join(", "),
            owner_note: String::new(),
            remedy: "Rename or unregister the conflicting commands first, or fix the duplicates in the imported file".into(),
        });
    }

    registry.commands.extend(incoming.commands);
    for (k, v) in incoming.extra {
        registry.extra.entry(k).or_insert(v);
    }
    Ok(registry)
}

/* ---- Statistics ---- */

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_commands: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub by_namespace: BTreeMap<String, usize>,
    pub aliases: usize,
    pub with_dependencies: usize,
    pub tags: BTreeSet<String>,
}

pub fn stats(registry: &Registry) -> RegistryStats {
    let mut out = RegistryStats {
        total_commands: registry.len(),
        ..Default::default()
    };
    for cmd in registry.iter() {
        *out.by_kind.entry(cmd.kind.to_string()).or_default() += 1;
        let ns = match cmd.namespace() {
            "" => "(root)",
            ns => ns,
        };
        *out.by_namespace.entry(ns.to_string()).or_default() += 1;
        out.aliases += cmd.aliases.len();
        if !cmd.depends_on.is_empty() {
            out.with_dependencies += 1;
        }
        out.tags.extend(cmd.tags.iter().cloned());
    }
    out
}
