//! Core data model: registered commands, the registry document, execution
//! plans and run results.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::num::NonZeroU64;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written into every registry document.
pub const CURRENT_VERSION: u32 = 1;

/* ---- Command kind ---- */

/// The closed set of target kinds a command can point at.
#[derive(
    clap::ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// An executable or shell command line.
    Shell,
    /// An interpreter module run by qualified path (`<python> -m <module>`).
    #[serde(alias = "python_module")]
    Module,
    /// An in-process function addressed as `module:function`.
    #[serde(alias = "python_callable")]
    Callable,
}

impl CommandKind {
    pub const fn variants() -> &'static [CommandKind] {
        &[CommandKind::Shell, CommandKind::Module, CommandKind::Callable]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Shell => "shell",
            CommandKind::Module => "module",
            CommandKind::Callable => "callable",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shell" => Ok(CommandKind::Shell),
            "module" | "python_module" => Ok(CommandKind::Module),
            "callable" | "python_callable" => Ok(CommandKind::Callable),
            other => Err(format!("unknown command kind '{other}'")),
        }
    }
}

/* ---- Registered command ---- */

/// One registry entry. The FQN is the registry key; `name` mirrors it in memory
/// and is never written to the record itself.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RegisteredCommand {
    #[serde(skip)]
    pub name: String,

    #[serde(alias = "type")]
    pub kind: CommandKind,

    pub target: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub aliases: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<NonZeroU64>,

    #[serde(default, rename = "env", skip_serializing_if = "BTreeMap::is_empty")]
    pub env_overlay: BTreeMap<String, String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    /// Fields this version does not know about, written back untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RegisteredCommand {
    pub fn new(
        name: impl Into<String>,
        kind: CommandKind,
        target: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            description: None,
            tags: BTreeSet::new(),
            aliases: BTreeSet::new(),
            depends_on: Vec::new(),
            timeout_seconds: None,
            env_overlay: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            extra: BTreeMap::new(),
        }
    }

    /// Leading colon-delimited segment; empty for root-level names.
    pub fn namespace(&self) -> &str {
        namespace_of(&self.name)
    }

    /// True if `name` is this entry's FQN or one of its aliases.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.contains(name)
    }
}

/// Namespace of an FQN: the first segment when the name has more than one.
pub fn namespace_of(fqn: &str) -> &str {
    match fqn.split_once(':') {
        Some((ns, _)) => ns,
        None => "",
    }
}

/* ---- Registry ---- */

/// The whole persisted registry. A plain value: loaded, transformed and handed
/// back to the store for persistence.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(try_from = "RegistryDocument")]
pub struct Registry {
    pub version: u32,
    pub commands: BTreeMap<String, RegisteredCommand>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// On-disk shape, before names are copied into the records.
#[derive(Deserialize)]
struct RegistryDocument {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    commands: BTreeMap<String, RegisteredCommand>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

impl TryFrom<RegistryDocument> for Registry {
    type Error = String;

    fn try_from(doc: RegistryDocument) -> Result<Self, Self::Error> {
        if doc.version != CURRENT_VERSION {
            return Err(format!(
                "unsupported registry version {} (expected {CURRENT_VERSION})",
                doc.version
            ));
        }
        let mut commands = doc.commands;
        for (name, cmd) in commands.iter_mut() {
            cmd.name = name.clone();
        }
        Ok(Registry {
            version: doc.version,
            commands,
            extra: doc.extra,
        })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            commands: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Entries in FQN lexical order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredCommand> {
        self.commands.values()
    }

    /// FQN of the entry answering to `name`, either directly or through an alias.
    pub fn owner_of(&self, name: &str) -> Option<&str> {
        if let Some((fqn, _)) = self.commands.get_key_value(name) {
            return Some(fqn.as_str());
        }
        self.commands
            .values()
            .find(|c| c.aliases.contains(name))
            .map(|c| c.name.as_str())
    }

    /// Look up by FQN or alias.
    pub fn get(&self, name: &str) -> Option<&RegisteredCommand> {
        let fqn = self.owner_of(name)?;
        self.commands.get(fqn)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.owner_of(name).is_some()
    }

    /// Every FQN and alias, for suggestions and completion.
    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        self.commands.values().flat_map(|c| {
            std::iter::once(c.name.as_str()).chain(c.aliases.iter().map(String::as_str))
        })
    }
}

/* ---- Execution plan ---- */

/// Fully resolved description of one invocation, before launch.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// FQN of the registered entry, or the module path for a dotted fallback.
    pub name: String,
    pub kind: CommandKind,
    pub target: String,
    /// Arguments forwarded verbatim to the target.
    pub argv: Vec<String>,
    /// Working directory; `None` runs in the invoking process's directory.
    pub cwd: Option<PathBuf>,
    /// Variables applied on top of the inherited environment.
    pub env_overlay: BTreeMap<String, String>,
    pub timeout_seconds: Option<NonZeroU64>,
}

impl ExecutionPlan {
    pub fn new(name: impl Into<String>, kind: CommandKind, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            argv: Vec::new(),
            cwd: None,
            env_overlay: BTreeMap::new(),
            timeout_seconds: None,
        }
    }

    /// Inherited environment with the overlay applied on top (overlay wins).
    pub fn effective_env<I>(&self, inherited: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env: BTreeMap<String, String> = inherited.into_iter().collect();
        for (k, v) in &self.env_overlay {
            env.insert(k.clone(), v.clone());
        }
        env
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(|s| Duration::from_secs(s.get()))
    }
}

/* ---- Run result ---- */

/// How a run ended, beyond its numeric return code.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RunStatus {
    /// The target ran to completion; its own code is in `return_code`.
    Exited,
    /// The target was terminated because its timeout expired.
    TimedOut,
    /// Invocation failed inside the router (callable panic, missing callable).
    Failed(String),
    /// Nothing was launched.
    DryRun,
}

/// What a dry run would have executed.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct PlanPreview {
    pub name: String,
    pub kind: CommandKind,
    pub target: String,
    /// Program and arguments as they would be launched.
    pub command_line: Vec<String>,
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env_overlay: BTreeMap<String, String>,
    pub timeout_seconds: Option<u64>,
}

impl fmt::Display for PlanPreview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[DRY RUN] {} ({}): {}",
            self.name,
            self.kind,
            shell_words::join(&self.command_line)
        )?;
        if let Some(cwd) = &self.cwd {
            write!(f, "\n[DRY RUN]   Working directory: {}", cwd.display())?;
        }
        for (k, v) in &self.env_overlay {
            write!(f, "\n[DRY RUN]   Env: {k}={v}")?;
        }
        if let Some(t) = self.timeout_seconds {
            write!(f, "\n[DRY RUN]   Timeout: {t}s")?;
        }
        Ok(())
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct RunResult {
    pub name: String,
    pub return_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<PlanPreview>,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.return_code == 0
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.status, RunStatus::TimedOut)
    }

    /// Synthetic successful result for a plan that was only previewed.
    pub fn dry_run(preview: PlanPreview) -> Self {
        let now = Utc::now();
        Self {
            name: preview.name.clone(),
            return_code: 0,
            stdout: None,
            stderr: None,
            duration: Duration::ZERO,
            status: RunStatus::DryRun,
            started_at: now,
            finished_at: now,
            preview: Some(preview),
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_parses_legacy_spellings() {
        assert_eq!("python_module".parse::<CommandKind>(), Ok(CommandKind::Module));
        assert_eq!("Callable".parse::<CommandKind>(), Ok(CommandKind::Callable));
        assert!("binary".parse::<CommandKind>().is_err());
        let k: CommandKind = serde_json::from_value(json!("python_callable")).unwrap();
        assert_eq!(k, CommandKind::Callable);
    }

    #[test]
    fn registry_document_fills_names_and_keeps_unknown_fields() {
        let doc = json!({
            "version": 1,
            "owner": "ops",
            "commands": {
                "infra:deploy": {
                    "kind": "shell",
                    "target": "./deploy.sh",
                    "created_at": "2024-01-01T00:00:00Z",
                    "updated_at": "2024-01-01T00:00:00Z",
                    "color": "blue"
                }
            }
        });
        let reg: Registry = serde_json::from_value(doc).unwrap();
        let cmd = reg.get("infra:deploy").unwrap();
        assert_eq!(cmd.name, "infra:deploy");
        assert_eq!(cmd.namespace(), "infra");
        assert_eq!(cmd.extra.get("color"), Some(&json!("blue")));

        let back = serde_json::to_value(&reg).unwrap();
        assert_eq!(back["owner"], json!("ops"));
        assert_eq!(back["commands"]["infra:deploy"]["color"], json!("blue"));
        assert!(back["commands"]["infra:deploy"].get("name").is_none());
    }

    #[test]
    fn missing_version_reads_as_current() {
        let reg: Registry = serde_json::from_value(json!({ "commands": {} })).unwrap();
        assert_eq!(reg.version, CURRENT_VERSION);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let err = serde_json::from_value::<Registry>(json!({ "version": 7 })).unwrap_err();
        assert!(err.to_string().contains("unsupported registry version"));
    }

    #[test]
    fn legacy_record_fields_are_accepted() {
        let reg: Registry = serde_json::from_value(json!({
            "version": 1,
            "commands": {
                "fmt": { "type": "python_module", "target": "black", "timeout": 30 }
            }
        }))
        .unwrap();
        let cmd = reg.get("fmt").unwrap();
        assert_eq!(cmd.kind, CommandKind::Module);
        assert_eq!(cmd.timeout_seconds.map(|t| t.get()), Some(30));
    }

    #[test]
    fn zero_timeout_does_not_deserialize() {
        let res = serde_json::from_value::<Registry>(json!({
            "version": 1,
            "commands": { "x": { "kind": "shell", "target": "x", "timeout_seconds": 0 } }
        }));
        assert!(res.is_err());
    }

    #[test]
    fn lookup_through_alias() {
        let mut reg = Registry::new();
        let mut cmd = RegisteredCommand::new("infra:deploy", CommandKind::Shell, "deploy", Utc::now());
        cmd.aliases.insert("dep".into());
        reg.commands.insert(cmd.name.clone(), cmd);
        assert_eq!(reg.owner_of("dep"), Some("infra:deploy"));
        assert_eq!(reg.get("dep").map(|c| c.name.as_str()), Some("infra:deploy"));
        assert!(reg.get("nope").is_none());
        let names: Vec<&str> = reg.all_names().collect();
        assert_eq!(names, vec!["infra:deploy", "dep"]);
    }

    #[test]
    fn effective_env_overlay_wins() {
        let mut plan = ExecutionPlan::new("x", CommandKind::Shell, "x");
        plan.env_overlay.insert("A".into(), "overlay".into());
        let env = plan.effective_env(vec![
            ("A".to_string(), "parent".to_string()),
            ("B".to_string(), "parent".to_string()),
        ]);
        assert_eq!(env.get("A").map(String::as_str), Some("overlay"));
        assert_eq!(env.get("B").map(String::as_str), Some("parent"));
    }
}
