/*!
`run.rs`

`tu run <NAME> [ARGS]...` and the bare form `tu <NAME> [ARGS]...`.

Arguments after the name are forwarded verbatim, hyphenated ones included.
Prerequisites run first; the first failing step ends the invocation and its
return code becomes the process exit code.

Behavior:
  - `--dry-run` prints one preview per step and launches nothing.
  - Non-dry runs are appended to the history file (when enabled); a history
    write failure is logged and never changes the exit code.
*/

use anyhow::Result;
use clap::Args;
use tracing::warn;
use tu::exec::Executor;
use tu::history::HistoryEntry;
use tu::options::OptionPipeline;
use tu::router::{Invocation, Outcome, Router};
use tu::{RunResult, RunStatus};

use crate::cmd::Context;
use crate::cmd::format::{Role, badge, color};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// FQN, alias or dotted module path
    pub name: String,

    /// Arguments forwarded to the command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Run `name args...` and return the exit code to hand to the shell.
pub fn execute_run(args: RunArgs, ctx: &Context) -> Result<i32> {
    let reg = ctx.store.load()?;
    let pipeline = OptionPipeline::builtin();
    let executor = Executor::new(ctx.settings.exec_options(ctx.dry_run));
    let router = Router::new(&reg, &pipeline, &executor).with_suggestions(ctx.settings.suggestions);

    let invocation = router.prepare(&args.name, &args.args, &ctx.options)?;
    if invocation.fallback && !ctx.quiet {
        eprintln!(
            "{}",
            color(
                Role::Dim,
                format!("{}running '{}' as a module", badge("info", &ctx.style), invocation.name),
                &ctx.style
            )
        );
    }
    let outcome = router.run(&invocation)?;

    if ctx.dry_run {
        for step in &outcome.steps {
            if let Some(preview) = &step.preview {
                println!("{preview}");
            }
        }
        return Ok(0);
    }

    report(&invocation, &outcome, ctx);
    if ctx.settings.record_history {
        record(&invocation, &args.args, &outcome, ctx);
    }
    Ok(outcome.return_code())
}

/// Explain non-obvious endings on stderr; plain nonzero exits speak for themselves.
fn report(invocation: &Invocation, outcome: &Outcome, ctx: &Context) {
    let Some(last) = outcome.last() else {
        return;
    };
    match &last.status {
        RunStatus::TimedOut => eprintln!(
            "{}{}",
            badge("clock", &ctx.style),
            color(Role::Warning, format!("'{}' timed out", last.name), &ctx.style)
        ),
        RunStatus::Failed(detail) => eprintln!(
            "{}{}",
            badge("error", &ctx.style),
            color(Role::Error, format!("'{}' failed: {detail}", last.name), &ctx.style)
        ),
        RunStatus::Exited | RunStatus::DryRun => {}
    }
    if outcome.stopped_early(invocation) && !ctx.quiet {
        eprintln!(
            "{}",
            color(
                Role::Error,
                format!(
                    "{}prerequisite '{}' exited with {}; '{}' was not run",
                    badge("link", &ctx.style),
                    last.name,
                    last.return_code,
                    invocation.name
                ),
                &ctx.style
            )
        );
    }
}

fn record(invocation: &Invocation, args: &[String], outcome: &Outcome, ctx: &Context) {
    let Some(last) = outcome.last() else {
        return;
    };
    let summary = summarize(outcome, last);
    let cwd = std::env::current_dir().ok();
    let entry = HistoryEntry::from_run(&invocation.name, args, cwd, &summary);
    if let Err(e) = ctx.history().record(entry) {
        warn!(error = %e, "could not record history");
    }
}

/// One result spanning the whole chain: first start, last finish, final status.
fn summarize(outcome: &Outcome, last: &RunResult) -> RunResult {
    let mut summary = last.clone();
    if let Some(first) = outcome.steps.first() {
        summary.started_at = first.started_at;
    }
    summary.duration = outcome.steps.iter().map(|s| s.duration).sum();
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use clap::Parser;
    use std::time::Duration;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        run: RunArgs,
    }

    #[test]
    fn hyphenated_arguments_are_forwarded() {
        let h = Harness::try_parse_from(["run", "lint", "--fix", "-v", "src/"]).unwrap();
        assert_eq!(h.run.name, "lint");
        assert_eq!(h.run.args, vec!["--fix", "-v", "src/"]);
    }

    fn step(name: &str, code: i32, secs: u64, started_at: chrono::DateTime<Utc>) -> RunResult {
        RunResult {
            name: name.into(),
            return_code: code,
            stdout: None,
            stderr: None,
            duration: Duration::from_secs(secs),
            status: RunStatus::Exited,
            started_at,
            finished_at: started_at,
            preview: None,
        }
    }

    #[test]
    fn summary_spans_the_chain() {
        let t0 = Utc::now();
        let outcome = Outcome {
            steps: vec![
                step("build", 0, 2, t0),
                step("deploy", 3, 1, t0 + ChronoDuration::seconds(2)),
            ],
        };
        let summary = summarize(&outcome, outcome.last().unwrap());
        assert_eq!(summary.name, "deploy");
        assert_eq!(summary.return_code, 3);
        assert_eq!(summary.started_at, t0);
        assert_eq!(summary.duration, Duration::from_secs(3));
    }
}
