/*!
Subcommand dispatch for the `tu` CLI.

Layout:
  src/cmd/
    mod.rs          (this file: module declarations, shared Context, re-exports)
    format.rs       (box / table / color helpers for human output)
    register.rs     (RegisterArgs + execute_register)
    manage.rs       (unregister / rename / edit)
    list.rs         (list + show)
    run.rs          (run + bare `tu <name>` form)
    history.rs      (history listing / clearing)
    transfer.rs     (export / import)
    inspect.rs      (validate / stats)
    completion.rs   (complete helper + shell scripts)

Conventions:
  - Each subcommand module exposes `XxxArgs` (clap::Args) and an `execute_xxx`
    function returning `anyhow::Result`.
  - `--json` output is plain serde_json; human output goes through `format`.
  - Core failures stay `RouterError` inside the anyhow chain so `main` can map
    them to exit codes.
*/

pub mod completion;
pub mod format;
pub mod history;
pub mod inspect;
pub mod list;
pub mod manage;
pub mod register;
pub mod run;
pub mod transfer;

use std::io::IsTerminal;

use chrono::{DateTime, Utc};
use tu::config::Settings;
use tu::history::HistoryStore;
use tu::options::OptionInvocation;
use tu::Registry;
use tu::store::RegistryStore;

use crate::cmd::format::StyleOptions;

pub use completion::{CompleteArgs, CompletionArgs, execute_complete, execute_completion};
pub use history::{HistoryArgs, execute_history};
pub use inspect::{StatsArgs, ValidateArgs, execute_stats, execute_validate};
pub use list::{ListArgs, ShowArgs, execute_list, execute_show};
pub use manage::{
    EditArgs, RenameArgs, UnregisterArgs, execute_edit, execute_rename, execute_unregister,
};
pub use register::{RegisterArgs, execute_register};
pub use run::{RunArgs, execute_run};
pub use transfer::{ExportArgs, ImportArgs, execute_export, execute_import};

/// Everything a subcommand needs besides its own arguments.
#[derive(Debug)]
pub struct Context {
    pub settings: Settings,
    pub store: RegistryStore,
    pub dry_run: bool,
    /// Global options in command-line order.
    pub options: Vec<OptionInvocation>,
    pub quiet: bool,
    pub style: StyleOptions,
}

impl Context {
    pub fn new(settings: Settings, dry_run: bool, options: Vec<OptionInvocation>, quiet: bool) -> Self {
        let store = RegistryStore::new(&settings.registry_path);
        Self {
            settings,
            store,
            dry_run,
            options,
            quiet,
            style: if std::io::stdout().is_terminal() {
                StyleOptions::detect()
            } else {
                StyleOptions::plain()
            },
        }
    }

    pub fn history(&self) -> HistoryStore {
        HistoryStore::new(&self.settings.history_path, self.settings.history_limit)
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// One registry read-modify-write. Under `--dry-run` the change is
    /// computed against the current registry and never saved.
    pub fn mutate<T, F>(&self, f: F) -> tu::Result<T>
    where
        F: FnOnce(Registry) -> tu::Result<(Registry, T)>,
    {
        if self.dry_run {
            self.store.preview(f)
        } else {
            self.store.update(f)
        }
    }

    /// Status line for a registry change, marked when nothing was saved.
    pub fn say_changed(&self, line: impl AsRef<str>) {
        if self.dry_run {
            self.say(format!("[DRY RUN] {} (registry unchanged)", line.as_ref()));
        } else {
            self.say(line);
        }
    }

    /// Print a human status line unless `-q` was given.
    pub fn say(&self, line: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", line.as_ref());
        }
    }
}

/// Parse repeated `KEY=VALUE` flags.
pub fn parse_env_pairs(raw: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    raw.iter()
        .map(|pair| tu::options::parse_assignment(pair).map_err(anyhow::Error::from))
        .collect()
}

#[cfg(test)]
pub(crate) fn test_context(dir: &std::path::Path, dry_run: bool) -> Context {
    let settings = Settings {
        registry_path: dir.join("registry.json"),
        history_path: dir.join("history.json"),
        history_limit: tu::history::DEFAULT_HISTORY_LIMIT,
        record_history: false,
        python: tu::exec::DEFAULT_PYTHON.into(),
        suggestions: tu::resolve::DEFAULT_SUGGESTIONS,
        callable_timeout: Default::default(),
        source: None,
    };
    Context::new(settings, dry_run, Vec::new(), true)
}
