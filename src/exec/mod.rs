//! Plan execution.
//!
//! One strategy per [`CommandKind`]:
//!   - shell: the target's own words plus the forwarded arguments, launched
//!     directly (or through `sh -c` when the target uses shell syntax)
//!   - module: `<python> -m <module> <args...>`
//!   - callable: looked up in the [`CallableTable`] and run in-process
//!
//! Timeouts, the environment overlay and dry-run apply uniformly.

pub mod callable;
pub mod launcher;

use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{EXIT_TIMED_OUT, Result, RouterError};
use crate::model::{CommandKind, ExecutionPlan, PlanPreview, RunResult, RunStatus};

pub use callable::{CallContext, CallOutcome, CallableTable};
pub use launcher::{LaunchOutcome, LaunchRequest, ProcessLauncher, TokioLauncher};

/// Interpreter used for module targets when nothing else is configured.
pub const DEFAULT_PYTHON: &str = "python3";

/// Characters that make a shell target need a real shell.
const SHELL_SYNTAX: &[char] = &[
    '|', '&', ';', '<', '>', '(', ')', '$', '`', '*', '?', '~', '\n',
];

/// What to do with a timeout on a callable target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CallableTimeoutPolicy {
    /// Run to completion; a warning is logged when a timeout was set.
    #[default]
    Ignore,
    /// Run on a worker thread and stop waiting on expiry. The thread cannot be
    /// killed and keeps running in the background until the process exits.
    Enforce,
}

#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub dry_run: bool,
    /// Capture stdout/stderr into the result instead of inheriting them.
    pub capture: bool,
    pub python: String,
    pub callable_timeout: CallableTimeoutPolicy,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            capture: false,
            python: DEFAULT_PYTHON.to_string(),
            callable_timeout: CallableTimeoutPolicy::default(),
        }
    }
}

pub struct Executor {
    launcher: Arc<dyn ProcessLauncher>,
    callables: Arc<CallableTable>,
    options: ExecOptions,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("callables", &self.callables)
            .field("options", &self.options)
            .finish()
    }
}

impl Executor {
    /// Real processes and the builtin callables.
    pub fn new(options: ExecOptions) -> Self {
        Self {
            launcher: Arc::new(TokioLauncher),
            callables: Arc::new(CallableTable::with_builtins()),
            options,
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_callables(mut self, callables: CallableTable) -> Self {
        self.callables = Arc::new(callables);
        self
    }

    pub fn options(&self) -> &ExecOptions {
        &self.options
    }

    pub fn callables(&self) -> &CallableTable {
        &self.callables
    }

    /// Program and arguments a plan would launch. Callables have no process,
    /// so their "command line" is the target followed by the arguments.
    pub fn command_line(&self, plan: &ExecutionPlan) -> Result<Vec<String>> {
        match plan.kind {
            CommandKind::Shell => shell_command_line(plan),
            CommandKind::Module => Ok([self.options.python.clone(), "-m".into(), plan.target.clone()]
                .into_iter()
                .chain(plan.argv.iter().cloned())
                .collect()),
            CommandKind::Callable => Ok(std::iter::once(plan.target.clone())
                .chain(plan.argv.iter().cloned())
                .collect()),
        }
    }

    pub fn preview(&self, plan: &ExecutionPlan) -> Result<PlanPreview> {
        Ok(PlanPreview {
            name: plan.name.clone(),
            kind: plan.kind,
            target: plan.target.clone(),
            command_line: self.command_line(plan)?,
            argv: plan.argv.clone(),
            cwd: plan.cwd.clone(),
            env_overlay: plan.env_overlay.clone(),
            timeout_seconds: plan.timeout_seconds.map(|t| t.get()),
        })
    }

    /// Run one plan. A target's own failure is a result, not an error; `Err`
    /// means the target could not be started.
    pub fn execute(&self, plan: &ExecutionPlan) -> Result<RunResult> {
        if self.options.dry_run {
            let preview = self.preview(plan)?;
            debug!(name = %plan.name, "dry run, nothing launched");
            return Ok(RunResult::dry_run(preview));
        }
        debug!(name = %plan.name, kind = %plan.kind, target = %plan.target, argv = ?plan.argv, cwd = ?plan.cwd, "executing plan");
        match plan.kind {
            CommandKind::Shell | CommandKind::Module => self.execute_process(plan),
            CommandKind::Callable => Ok(self.execute_callable(plan)),
        }
    }

    /// Run plans in order, stopping after the first nonzero result. The last
    /// element is the result to report.
    pub fn execute_chain(&self, plans: &[ExecutionPlan]) -> Result<Vec<RunResult>> {
        let mut results = Vec::with_capacity(plans.len());
        for plan in plans {
            let result = self.execute(plan)?;
            let failed = !result.success();
            results.push(result);
            if failed {
                debug!(name = %plan.name, "chain stopped at failing step");
                break;
            }
        }
        Ok(results)
    }

    fn execute_process(&self, plan: &ExecutionPlan) -> Result<RunResult> {
        let mut words = self.command_line(plan)?.into_iter();
        let program = words
            .next()
            .ok_or_else(|| RouterError::InvalidRequest(format!("'{}' has an empty target", plan.name)))?;
        let request = LaunchRequest {
            program,
            args: words.collect(),
            cwd: plan.cwd.clone(),
            env_overlay: plan.env_overlay.clone(),
            timeout: plan.timeout(),
            capture: self.options.capture,
        };

        let started_at = Utc::now();
        let clock = Instant::now();
        let outcome = self
            .launcher
            .launch(&request)
            .map_err(|source| RouterError::Launch {
                program: request.program.clone(),
                source,
            })?;
        let duration = clock.elapsed();

        let status = if outcome.timed_out {
            RunStatus::TimedOut
        } else {
            RunStatus::Exited
        };
        Ok(RunResult {
            name: plan.name.clone(),
            return_code: outcome.return_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            duration,
            status,
            started_at,
            finished_at: Utc::now(),
            preview: None,
        })
    }

    fn execute_callable(&self, plan: &ExecutionPlan) -> RunResult {
        let started_at = Utc::now();
        let clock = Instant::now();

        let mut ctx = CallContext::new(plan.argv.clone(), self.options.capture);
        ctx.cwd = plan.cwd.clone();
        ctx.env_overlay = plan.env_overlay.clone();

        let (outcome, stdout, stderr) = match self.callables.get(&plan.target) {
            None => (
                CallOutcome::Failed(format!(
                    "callable '{}' is not available in this build",
                    plan.target
                )),
                None,
                None,
            ),
            Some(f) => match (plan.timeout(), self.options.callable_timeout) {
                (Some(limit), CallableTimeoutPolicy::Enforce) => {
                    match run_with_deadline(f, ctx, limit) {
                        Some((outcome, mut ctx)) => {
                            let (out, err) = ctx.take_output();
                            (outcome, out, err)
                        }
                        None => {
                            warn!(name = %plan.name, "callable timed out; its thread keeps running");
                            return RunResult {
                                name: plan.name.clone(),
                                return_code: EXIT_TIMED_OUT,
                                stdout: None,
                                stderr: None,
                                duration: clock.elapsed(),
                                status: RunStatus::TimedOut,
                                started_at,
                                finished_at: Utc::now(),
                                preview: None,
                            };
                        }
                    }
                }
                (limit, _) => {
                    if limit.is_some() {
                        warn!(name = %plan.name, "timeout is not enforced for callable targets");
                    }
                    let outcome = callable::invoke(f.as_ref(), &mut ctx);
                    let (out, err) = ctx.take_output();
                    (outcome, out, err)
                }
            },
        };

        let status = match &outcome {
            CallOutcome::Failed(detail) => RunStatus::Failed(detail.clone()),
            _ => RunStatus::Exited,
        };
        RunResult {
            name: plan.name.clone(),
            return_code: outcome.return_code(),
            stdout,
            stderr,
            duration: clock.elapsed(),
            status,
            started_at,
            finished_at: Utc::now(),
            preview: None,
        }
    }
}

/// Run a callable on a worker thread; `None` if it did not finish in time.
fn run_with_deadline(
    f: Arc<callable::CallableFn>,
    mut ctx: CallContext,
    limit: Duration,
) -> Option<(CallOutcome, CallContext)> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let outcome = callable::invoke(f.as_ref(), &mut ctx);
        let _ = tx.send((outcome, ctx));
    });
    rx.recv_timeout(limit).ok()
}

/// Words that only a shell can run.
const SHELL_BUILTINS: &[&str] = &[
    ".", ":", "alias", "cd", "eval", "exec", "export", "for", "if", "readonly", "set", "source",
    "ulimit", "umask", "unset", "while", "{", "!",
];

/// Whether a shell target needs `sh -c` to be interpreted correctly.
pub fn needs_shell(target: &str) -> bool {
    if target.contains(SHELL_SYNTAX) {
        return true;
    }
    let first = target.split_whitespace().next().unwrap_or_default();
    is_assignment(first) || SHELL_BUILTINS.contains(&first)
}

/// `NAME=value` as a leading word: `=` before any quote, after a valid identifier.
fn is_assignment(word: &str) -> bool {
    let Some(eq) = word.find('=') else {
        return false;
    };
    let name = &word[..eq];
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn shell_command_line(plan: &ExecutionPlan) -> Result<Vec<String>> {
    let target = plan.target.trim();
    if target.is_empty() {
        return Err(RouterError::InvalidRequest(format!("'{}' has an empty target", plan.name)));
    }
    if needs_shell(target) {
        // "$@" keeps the forwarded arguments verbatim; $0 is the command name.
        return Ok(["sh".to_string(), "-c".into(), format!("{target} \"$@\""), plan.name.clone()]
            .into_iter()
            .chain(plan.argv.iter().cloned())
            .collect());
    }
    let mut words = shell_words::split(target)
        .map_err(|e| RouterError::InvalidRequest(format!("cannot parse target of '{}': {e}", plan.name)))?;
    words.extend(plan.argv.iter().cloned());
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::num::NonZeroU64;
    use std::sync::Mutex;

    /// Records every request and replies with queued exit codes (default 0).
    #[derive(Default)]
    struct RecordingLauncher {
        calls: Mutex<Vec<LaunchRequest>>,
        codes: Mutex<VecDeque<i32>>,
    }

    impl RecordingLauncher {
        fn with_codes(codes: &[i32]) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::default(),
                codes: Mutex::new(codes.iter().copied().collect()),
            })
        }

        fn calls(&self) -> Vec<LaunchRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProcessLauncher for RecordingLauncher {
        fn launch(&self, request: &LaunchRequest) -> std::io::Result<LaunchOutcome> {
            self.calls.lock().unwrap().push(request.clone());
            let code = self.codes.lock().unwrap().pop_front().unwrap_or(0);
            Ok(LaunchOutcome {
                return_code: code,
                ..Default::default()
            })
        }
    }

    fn executor(launcher: Arc<RecordingLauncher>, options: ExecOptions) -> Executor {
        Executor::new(options).with_launcher(launcher)
    }

    fn shell_plan(name: &str, target: &str, argv: &[&str]) -> ExecutionPlan {
        let mut plan = ExecutionPlan::new(name, CommandKind::Shell, target);
        plan.argv = argv.iter().map(|a| a.to_string()).collect();
        plan
    }

    #[test]
    fn shell_target_words_precede_forwarded_args() {
        let launcher = RecordingLauncher::with_codes(&[3]);
        let exec = executor(launcher.clone(), ExecOptions::default());
        let result = exec.execute(&shell_plan("clean", "make clean", &["--dry"])).unwrap();
        assert_eq!(result.return_code, 3);
        assert_eq!(result.status, RunStatus::Exited);
        let calls = launcher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command_line(), vec!["make", "clean", "--dry"]);
    }

    #[test]
    fn shell_syntax_goes_through_sh() {
        let plan = shell_plan("logs", "cat app.log | grep ERROR", &["-i", "it's"]);
        let line = Executor::new(ExecOptions::default()).command_line(&plan).unwrap();
        assert_eq!(
            line,
            vec!["sh", "-c", "cat app.log | grep ERROR \"$@\"", "logs", "-i", "it's"]
        );
    }

    #[test]
    fn leading_assignment_or_builtin_goes_through_sh() {
        let exec = Executor::new(ExecOptions::default());
        let line = exec
            .command_line(&shell_plan("greet", "GREETING=hi sh -c 'exit 3'", &["x"]))
            .unwrap();
        assert_eq!(line[..3], ["sh", "-c", "GREETING=hi sh -c 'exit 3' \"$@\""]);
        assert_eq!(line[3..], ["greet", "x"]);

        assert!(needs_shell("cd build && make"));
        assert!(needs_shell("export A=1"));
        assert!(needs_shell("source env.sh"));
        assert!(!needs_shell("make clean"));
        assert!(!needs_shell("grep --color=auto x"));
        assert!(!needs_shell("'A=1' ls"));
        assert!(!needs_shell("1A=x ls"));
    }

    #[test]
    fn module_fallback_uses_configured_interpreter() {
        let launcher = RecordingLauncher::with_codes(&[0]);
        let options = ExecOptions {
            python: "python3.12".into(),
            ..Default::default()
        };
        let exec = executor(launcher.clone(), options);
        let mut plan = ExecutionPlan::new("json.tool", CommandKind::Module, "json.tool");
        plan.argv = vec!["in.json".into()];
        exec.execute(&plan).unwrap();
        assert_eq!(
            launcher.calls()[0].command_line(),
            vec!["python3.12", "-m", "json.tool", "in.json"]
        );
    }

    #[test]
    fn plan_fields_reach_the_launcher() {
        let launcher = RecordingLauncher::with_codes(&[]);
        let exec = executor(launcher.clone(), ExecOptions::default());
        let mut plan = shell_plan("x", "true", &[]);
        plan.cwd = Some("/srv".into());
        plan.env_overlay.insert("K".into(), "V".into());
        plan.timeout_seconds = NonZeroU64::new(7);
        exec.execute(&plan).unwrap();
        let req = &launcher.calls()[0];
        assert_eq!(req.cwd.as_deref(), Some(std::path::Path::new("/srv")));
        assert_eq!(req.env_overlay.get("K").map(String::as_str), Some("V"));
        assert_eq!(req.timeout, Some(Duration::from_secs(7)));
    }

    #[test]
    fn dry_run_launches_nothing() {
        let launcher = RecordingLauncher::with_codes(&[9]);
        let options = ExecOptions {
            dry_run: true,
            ..Default::default()
        };
        let exec = executor(launcher.clone(), options);
        let mut plan = shell_plan("clean", "make clean", &["--dry"]);
        plan.timeout_seconds = NonZeroU64::new(5);
        let result = exec.execute(&plan).unwrap();
        assert_eq!(result.return_code, 0);
        assert_eq!(result.status, RunStatus::DryRun);
        let preview = result.preview.unwrap();
        assert_eq!(preview.command_line, vec!["make", "clean", "--dry"]);
        assert_eq!(preview.timeout_seconds, Some(5));
        assert!(preview.to_string().starts_with("[DRY RUN] clean (shell): make clean --dry"));
        assert!(launcher.calls().is_empty());
    }

    #[test]
    fn chain_stops_at_first_failure() {
        let launcher = RecordingLauncher::with_codes(&[0, 4, 0]);
        let exec = executor(launcher.clone(), ExecOptions::default());
        let plans = vec![
            shell_plan("a", "true", &[]),
            shell_plan("b", "false", &[]),
            shell_plan("c", "true", &[]),
        ];
        let results = exec.execute_chain(&plans).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results.last().unwrap().name, "b");
        assert_eq!(results.last().unwrap().return_code, 4);
        assert_eq!(launcher.calls().len(), 2);
    }

    #[test]
    fn timed_out_launch_is_distinct() {
        struct Slow;
        impl ProcessLauncher for Slow {
            fn launch(&self, _: &LaunchRequest) -> std::io::Result<LaunchOutcome> {
                Ok(LaunchOutcome {
                    return_code: EXIT_TIMED_OUT,
                    timed_out: true,
                    ..Default::default()
                })
            }
        }
        let exec = Executor::new(ExecOptions::default()).with_launcher(Arc::new(Slow));
        let result = exec.execute(&shell_plan("slow", "sleep 10", &[])).unwrap();
        assert!(result.timed_out());
        assert!(!result.success());
    }

    #[test]
    fn launch_failure_is_an_error() {
        struct Broken;
        impl ProcessLauncher for Broken {
            fn launch(&self, _: &LaunchRequest) -> std::io::Result<LaunchOutcome> {
                Err(std::io::Error::from(std::io::ErrorKind::NotFound))
            }
        }
        let exec = Executor::new(ExecOptions::default()).with_launcher(Arc::new(Broken));
        let err = exec.execute(&shell_plan("x", "nope", &[])).unwrap_err();
        assert!(matches!(err, RouterError::Launch { ref program, .. } if program == "nope"));
        assert_eq!(err.exit_code(), crate::error::EXIT_LAUNCH);
    }

    fn callable_exec(policy: CallableTimeoutPolicy) -> Executor {
        let mut table = CallableTable::with_builtins();
        table.insert("app:fail", |_: &mut CallContext| CallOutcome::Failed("bad input".into()));
        table.insert("app:cwd", |ctx: &mut CallContext| {
            let cwd = ctx.cwd.clone().unwrap_or_default();
            ctx.println(cwd.display());
            CallOutcome::Success
        });
        Executor::new(ExecOptions {
            capture: true,
            callable_timeout: policy,
            ..Default::default()
        })
        .with_launcher(RecordingLauncher::with_codes(&[]))
        .with_callables(table)
    }

    fn callable_plan(target: &str, argv: &[&str]) -> ExecutionPlan {
        let mut plan = ExecutionPlan::new(target, CommandKind::Callable, target);
        plan.argv = argv.iter().map(|a| a.to_string()).collect();
        plan
    }

    #[test]
    fn callable_outcomes_map_to_results() {
        let exec = callable_exec(CallableTimeoutPolicy::Ignore);

        let ok = exec.execute(&callable_plan("builtins:echo", &["hi", "there"])).unwrap();
        assert_eq!(ok.return_code, 0);
        assert_eq!(ok.stdout.as_deref(), Some("hi there\n"));

        let failed = exec.execute(&callable_plan("app:fail", &[])).unwrap();
        assert_eq!(failed.return_code, 1);
        assert_eq!(failed.status, RunStatus::Failed("bad input".into()));

        let missing = exec.execute(&callable_plan("nowhere:main", &[])).unwrap();
        assert_ne!(missing.return_code, 0);
        assert!(matches!(missing.status, RunStatus::Failed(ref d) if d.contains("not available")));
    }

    #[test]
    fn callable_sees_plan_cwd_without_chdir() {
        let exec = callable_exec(CallableTimeoutPolicy::Ignore);
        let before = std::env::current_dir().unwrap();
        let mut plan = callable_plan("app:cwd", &[]);
        plan.cwd = Some("/var/tmp".into());
        let result = exec.execute(&plan).unwrap();
        assert_eq!(result.stdout.as_deref(), Some("/var/tmp\n"));
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[test]
    fn callable_timeout_policy() {
        let mut plan = callable_plan("builtins:sleep", &["2"]);
        plan.timeout_seconds = NonZeroU64::new(1);

        let enforced = callable_exec(CallableTimeoutPolicy::Enforce).execute(&plan).unwrap();
        assert!(enforced.timed_out());
        assert_eq!(enforced.return_code, EXIT_TIMED_OUT);

        let mut quick = callable_plan("builtins:echo", &["fast"]);
        quick.timeout_seconds = NonZeroU64::new(5);
        let result = callable_exec(CallableTimeoutPolicy::Enforce).execute(&quick).unwrap();
        assert_eq!(result.stdout.as_deref(), Some("fast\n"));

        let ignored = callable_exec(CallableTimeoutPolicy::Ignore).execute(&plan).unwrap();
        assert_eq!(ignored.return_code, 0);
        assert!(!ignored.timed_out());
    }

    #[cfg(unix)]
    #[test]
    fn real_processes_pass_exit_codes() {
        let exec = Executor::new(ExecOptions {
            capture: true,
            ..Default::default()
        });
        assert_eq!(exec.execute(&shell_plan("t", "true", &[])).unwrap().return_code, 0);
        assert_eq!(exec.execute(&shell_plan("f", "false", &[])).unwrap().return_code, 1);
        let echoed = exec
            .execute(&shell_plan("e", "echo start", &["a b", "$HOME"]))
            .unwrap();
        assert_eq!(echoed.stdout.as_deref(), Some("start a b $HOME\n"));
        let piped = exec
            .execute(&shell_plan("p", "printf '%s|' x; printf '%s|'", &["a b", "c"]))
            .unwrap();
        assert_eq!(piped.stdout.as_deref(), Some("x|a b|c|"));
        let assigned = exec
            .execute(&shell_plan("g", "GREETING=hi sh -c 'exit 3'", &[]))
            .unwrap();
        assert_eq!(assigned.return_code, 3);
    }
}
