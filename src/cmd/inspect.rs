/*!
`inspect.rs`

Read-only registry checks.

`tu validate [NAME] [--json]` reports, per command:
  - shell: the program exists (an executable path, or found on PATH); targets
    that need a shell check for `sh` instead
  - module: the configured interpreter is found
  - callable: the target is available in this build
  - every kind: dependencies resolve and form no cycle
Exits nonzero when any command has a problem.

`tu stats [--json]` prints counts by kind and namespace.

JSON Output Shape (validate):
{
  "status": "ok" | "invalid",
  "checked": 3,
  "problems": [ { "name": "deploy", "problems": ["program 'kubectl' not found on PATH"] } ]
}
*/

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use tu::RouterError;
use tu::deps;
use tu::exec::{CallableTable, needs_shell};
use tu::model::{CommandKind, RegisteredCommand, Registry};
use tu::registry;

use crate::cmd::Context;
use crate::cmd::format::{Role, badge, box_header, color, emoji, fields, table};

/* ---- validate ---- */

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Check only this command (FQN or alias)
    pub name: Option<String>,

    /// Output JSON instead of human-readable text
    #[arg(long)]
    pub json: bool,
}

/// Problems found for one command; empty means valid.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Finding {
    pub name: String,
    pub problems: Vec<String>,
}

struct Checker<'a> {
    registry: &'a Registry,
    callables: CallableTable,
    python: &'a str,
    path_var: Option<OsString>,
}

impl Checker<'_> {
    fn check(&self, cmd: &RegisteredCommand) -> Finding {
        let mut problems = Vec::new();
        match cmd.kind {
            CommandKind::Shell => {
                if let Err(p) = self.check_shell(&cmd.target) {
                    problems.push(p);
                }
            }
            CommandKind::Module => {
                if find_program(self.python, self.path_var.as_ref()).is_none() {
                    problems.push(format!("interpreter '{}' not found", self.python));
                }
            }
            CommandKind::Callable => {
                if !self.callables.contains(&cmd.target) {
                    problems.push(format!("callable '{}' is not available in this build", cmd.target));
                }
            }
        }
        if let Err(e) = deps::expand(self.registry, cmd) {
            problems.push(e.to_string());
        }
        Finding {
            name: cmd.name.clone(),
            problems,
        }
    }

    fn check_shell(&self, target: &str) -> std::result::Result<(), String> {
        let program = if needs_shell(target) {
            "sh".to_string()
        } else {
            let words = shell_words::split(target).map_err(|e| format!("cannot parse target: {e}"))?;
            words.into_iter().next().ok_or_else(|| "target is empty".to_string())?
        };
        match find_program(&program, self.path_var.as_ref()) {
            Some(_) => Ok(()),
            None if has_separator(&program) => Err(format!("'{program}' does not exist or is not executable")),
            None => Err(format!("program '{program}' not found on PATH")),
        }
    }
}

fn has_separator(program: &str) -> bool {
    program.contains('/') || program.contains(std::path::MAIN_SEPARATOR)
}

/// Locate `program`: a path is checked directly, a bare name is searched on `path_var`.
fn find_program(program: &str, path_var: Option<&OsString>) -> Option<PathBuf> {
    if has_separator(program) {
        let p = Path::new(program);
        return is_executable(p).then(|| p.to_path_buf());
    }
    std::env::split_paths(path_var?)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Returns the exit code: 0 when every checked command is valid, 1 otherwise.
pub fn execute_validate(args: ValidateArgs, ctx: &Context) -> Result<i32> {
    let reg = ctx.store.load()?;
    let checker = Checker {
        registry: &reg,
        callables: CallableTable::with_builtins(),
        python: &ctx.settings.python,
        path_var: std::env::var_os("PATH"),
    };

    let targets: Vec<&RegisteredCommand> = match &args.name {
        Some(name) => vec![registry::get(&reg, name).ok_or_else(|| RouterError::NotFound(name.clone()))?],
        None => reg.iter().collect(),
    };
    let findings: Vec<Finding> = targets.iter().map(|c| checker.check(c)).collect();
    let invalid: Vec<&Finding> = findings.iter().filter(|f| !f.problems.is_empty()).collect();
    let code = if invalid.is_empty() { 0 } else { 1 };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "status": if invalid.is_empty() { "ok" } else { "invalid" },
                "checked": findings.len(),
                "problems": invalid,
            }))?
        );
        return Ok(code);
    }

    let style = &ctx.style;
    if invalid.is_empty() {
        ctx.say(format!(
            "{}{} command(s) checked, no problems found",
            badge("success", style),
            findings.len()
        ));
        return Ok(code);
    }
    println!(
        "{}",
        box_header(
            format!("{} Problems ({} of {})", emoji("warn", style), invalid.len(), findings.len()),
            None::<&str>,
            style
        )
    );
    let rows: Vec<Vec<String>> = invalid
        .iter()
        .flat_map(|f| {
            f.problems
                .iter()
                .map(|p| vec![f.name.clone(), color(Role::Error, p, style)])
        })
        .collect();
    println!("{}", table(&["NAME", "PROBLEM"], &rows, style));
    Ok(code)
}

/* ---- stats ---- */

#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Output JSON instead of human-readable text
    #[arg(long)]
    pub json: bool,
}

pub fn execute_stats(args: StatsArgs, ctx: &Context) -> Result<()> {
    let reg = ctx.store.load()?;
    let stats = registry::stats(&reg);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let style = &ctx.style;
    let counts = |m: &std::collections::BTreeMap<String, usize>| {
        (!m.is_empty()).then(|| {
            m.iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ")
        })
    };
    println!(
        "{}",
        box_header(
            format!("{} Registry", emoji("info", style)),
            Some(ctx.store.path().display().to_string()),
            style
        )
    );
    println!(
        "{}",
        fields(
            &[
                ("Commands", Some(stats.total_commands.to_string())),
                ("By kind", counts(&stats.by_kind)),
                ("By namespace", counts(&stats.by_namespace)),
                ("Aliases", Some(stats.aliases.to_string())),
                ("With dependencies", Some(stats.with_dependencies.to_string())),
                (
                    "Tags",
                    (!stats.tags.is_empty())
                        .then(|| stats.tags.iter().cloned().collect::<Vec<_>>().join(", "))
                ),
            ],
            style
        )
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tu::registry::RegisterRequest;

    fn with(reg: Registry, req: RegisterRequest) -> Registry {
        registry::register(reg, req, Utc::now()).unwrap().0
    }

    #[cfg(unix)]
    fn fake_path() -> (tempfile::TempDir, OsString) {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        for name in ["tool", "sh", "python3"] {
            let p = dir.path().join(name);
            std::fs::write(&p, "#!/bin/sh\n").unwrap();
            std::fs::set_permissions(&p, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        std::fs::write(dir.path().join("plain"), "").unwrap();
        let var = dir.path().as_os_str().to_owned();
        (dir, var)
    }

    #[cfg(unix)]
    #[test]
    fn program_lookup_honours_executable_bit() {
        let (_dir, var) = fake_path();
        assert!(find_program("tool", Some(&var)).is_some());
        assert!(find_program("plain", Some(&var)).is_none());
        assert!(find_program("missing", Some(&var)).is_none());
        assert!(find_program("tool", None).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn findings_per_kind() {
        let (_dir, var) = fake_path();
        let mut reg = Registry::new();
        reg = with(reg, RegisterRequest::new("tool --flag").named("ok"));
        reg = with(reg, RegisterRequest::new("nosuchprogram").named("gone"));
        reg = with(reg, RegisterRequest::new("tool | wc -l").named("piped"));
        reg = with(reg, RegisterRequest::new("pkg.mod").named("mod").kind(CommandKind::Module));
        reg = with(reg, RegisterRequest::new("builtins:echo").named("say"));
        reg = with(reg, RegisterRequest::new("nowhere:fn").named("lost").kind(CommandKind::Callable));

        let checker = Checker {
            registry: &reg,
            callables: CallableTable::with_builtins(),
            python: "python3",
            path_var: Some(var),
        };
        let problems = |name: &str| checker.check(reg.get(name).unwrap()).problems;

        assert!(problems("ok").is_empty());
        assert_eq!(problems("gone"), vec!["program 'nosuchprogram' not found on PATH"]);
        assert!(problems("piped").is_empty());
        assert!(problems("mod").is_empty());
        assert!(problems("say").is_empty());
        assert_eq!(problems("lost").len(), 1);
    }

    #[test]
    fn missing_dependency_is_reported() {
        let mut reg = Registry::new();
        reg = with(reg, RegisterRequest::new("builtins:true").named("base"));
        reg = with(reg, RegisterRequest::new("builtins:true").named("top").depends_on(["base"]));
        let (next, _) = registry::unregister(reg, "base").unwrap();

        let checker = Checker {
            registry: &next,
            callables: CallableTable::with_builtins(),
            python: "python3",
            path_var: None,
        };
        let finding = checker.check(next.get("top").unwrap());
        assert_eq!(finding.problems.len(), 1);
        assert!(finding.problems[0].contains("'base'"));
    }
}
