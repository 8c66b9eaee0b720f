//! Router error taxonomy.
//!
//! Every failure the core can report to a caller is one variant of
//! [`RouterError`]. The CLI renders these directly and maps them to process
//! exit codes through [`RouterError::exit_code`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Exit code used for router-level failures (bad name, collision, unknown command ...).
pub const EXIT_ROUTER: i32 = 2;
/// Exit code used when the registry or configuration cannot be read or written.
pub const EXIT_STORAGE: i32 = 3;
/// Exit code reported for a target killed by its timeout.
pub const EXIT_TIMED_OUT: i32 = 124;
/// Exit code used when a target could not be launched at all.
pub const EXIT_LAUNCH: i32 = 127;

/// Ranked "did you mean" candidates attached to [`RouterError::UnknownCommand`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Suggestions(pub Vec<String>);

impl fmt::Display for Suggestions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        f.write_str("\nDid you mean one of these?")?;
        for s in &self.0 {
            write!(f, "\n  - {s}")?;
        }
        Ok(())
    }
}

/// A dependency cycle, listed from the first repeated command onwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle(pub Vec<String>);

impl Cycle {
    pub fn members(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|m| m == name)
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut path = self.0.join(" -> ");
        if let Some(first) = self.0.first() {
            path.push_str(" -> ");
            path.push_str(first);
        }
        f.write_str(&path)
    }
}

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("invalid command name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error(
        "name '{0}' contains a dot, which shadows the dotted-name module rule; \
         re-run with --force-dot-name to register it anyway"
    )]
    DottedNameConfirmationRequired(String),

    #[error("command '{name}' already exists{owner_note}. {remedy}")]
    NameCollision {
        name: String,
        owner_note: String,
        remedy: String,
    },

    #[error("command '{0}' not found in registry. Run 'tu list' to see registered commands")]
    NotFound(String),

    #[error("unknown command: {name}{suggestions}")]
    UnknownCommand {
        name: String,
        suggestions: Suggestions,
    },

    #[error("dependency cycle detected: {0}")]
    CycleError(Cycle),

    #[error(
        "command '{dependent}' depends on '{missing}', which is not registered. \
         Register it or run 'tu edit {dependent} --depends-on ...' to fix the list"
    )]
    MissingDependency { dependent: String, missing: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown global option: --{0}")]
    UnknownOption(String),

    #[error("global option '{0}' is registered more than once")]
    DuplicateOption(String),

    #[error(
        "registry file {path} is corrupted: {reason}. \
         Back it up and fix or remove it; tu never repairs it automatically"
    )]
    RegistryCorrupted { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RouterError {
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Collision on register/import: the name is taken by `owner`.
    pub fn collision(name: impl Into<String>, owner: Option<&str>) -> Self {
        let name = name.into();
        let owner_note = match owner {
            Some(o) if o != name => format!(" (alias of '{o}')"),
            _ => String::new(),
        };
        let holder = owner.unwrap_or(&name).to_string();
        Self::NameCollision {
            remedy: format!(
                "Use 'tu unregister {holder}' to remove it, or 'tu rename {holder} <new_name>' to rename it"
            ),
            name,
            owner_note,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupted(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::RegistryCorrupted {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Process exit code the CLI uses when this error ends the invocation.
    pub fn exit_code(&self) -> i32 {
        match self {
            RouterError::RegistryCorrupted { .. }
            | RouterError::Config(_)
            | RouterError::Io { .. } => EXIT_STORAGE,
            RouterError::Launch { .. } => EXIT_LAUNCH,
            _ => EXIT_ROUTER,
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
