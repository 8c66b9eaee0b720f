//! One invocation end to end: resolve, expand dependencies, apply global
//! options, execute.

use tracing::debug;

use crate::deps;
use crate::error::Result;
use crate::exec::Executor;
use crate::model::{ExecutionPlan, Registry, RunResult};
use crate::options::{OptionInvocation, OptionPipeline};
use crate::resolve::{self, DEFAULT_SUGGESTIONS, Resolved};

/// Prepared work for one user invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// FQN of the invoked entry, or the module path for a fallback.
    pub name: String,
    pub fallback: bool,
    /// Prerequisites first, the invoked entry last.
    pub plans: Vec<ExecutionPlan>,
}

/// Results of the steps that ran; stops at the first failing step.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub steps: Vec<RunResult>,
}

impl Outcome {
    /// The result to report: the failing step, or the invoked entry.
    pub fn last(&self) -> Option<&RunResult> {
        self.steps.last()
    }

    pub fn return_code(&self) -> i32 {
        self.last().map_or(0, |r| r.return_code)
    }

    /// True when a prerequisite failed and the invoked entry never ran.
    pub fn stopped_early(&self, invocation: &Invocation) -> bool {
        self.steps.len() < invocation.plans.len()
    }
}

pub struct Router<'a> {
    registry: &'a Registry,
    pipeline: &'a OptionPipeline,
    executor: &'a Executor,
    suggestions: usize,
}

impl<'a> Router<'a> {
    pub fn new(registry: &'a Registry, pipeline: &'a OptionPipeline, executor: &'a Executor) -> Self {
        Self {
            registry,
            pipeline,
            executor,
            suggestions: DEFAULT_SUGGESTIONS,
        }
    }

    pub fn with_suggestions(mut self, limit: usize) -> Self {
        self.suggestions = limit;
        self
    }

    /// Build the plans for `name args...`. Arguments go to the invoked entry
    /// only; global options apply to every step.
    pub fn prepare(&self, name: &str, args: &[String], options: &[OptionInvocation]) -> Result<Invocation> {
        let resolved = resolve::resolve_with(self.registry, name, self.suggestions)?;
        let base = match resolved {
            Resolved::Registered(cmd) => deps::expand(self.registry, cmd)?
                .into_iter()
                .map(|step| {
                    if step.name == cmd.name {
                        resolve::plan_for_command(step, args)
                    } else {
                        resolve::plan_for_command(step, &[])
                    }
                })
                .collect(),
            Resolved::ModuleFallback(_) => vec![resolve::plan_for(&resolved, args)],
        };

        let plans = base
            .into_iter()
            .map(|plan| self.pipeline.apply(plan, options))
            .collect::<Result<Vec<_>>>()?;
        debug!(name = resolved.name(), steps = plans.len(), "invocation prepared");
        Ok(Invocation {
            name: resolved.name().to_string(),
            fallback: resolved.is_fallback(),
            plans,
        })
    }

    pub fn run(&self, invocation: &Invocation) -> Result<Outcome> {
        let steps = self.executor.execute_chain(&invocation.plans)?;
        Ok(Outcome { steps })
    }

    /// `prepare` followed by `run`.
    pub fn invoke(&self, name: &str, args: &[String], options: &[OptionInvocation]) -> Result<(Invocation, Outcome)> {
        let invocation = self.prepare(name, args, options)?;
        let outcome = self.run(&invocation)?;
        Ok((invocation, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouterError;
    use crate::exec::{ExecOptions, LaunchOutcome, LaunchRequest, ProcessLauncher};
    use crate::model::{CommandKind, RunStatus};
    use crate::registry::{RegisterRequest, register};
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Vec<String>>>,
        fail_on: Option<String>,
    }

    impl ProcessLauncher for Recorder {
        fn launch(&self, request: &LaunchRequest) -> std::io::Result<LaunchOutcome> {
            let line = request.command_line();
            let code = match &self.fail_on {
                Some(word) if line.contains(word) => 5,
                _ => 0,
            };
            self.calls.lock().unwrap().push(line);
            Ok(LaunchOutcome {
                return_code: code,
                ..Default::default()
            })
        }
    }

    fn registry() -> Registry {
        let reqs = vec![
            RegisterRequest::new("make clean").named("clean"),
            RegisterRequest::new("echo a").named("a"),
            RegisterRequest::new("echo b").named("b"),
            RegisterRequest::new("echo c").named("c").depends_on(["a"]),
            RegisterRequest::new("echo d").named("d").depends_on(["b", "c"]),
        ];
        reqs.into_iter()
            .fold(Registry::new(), |reg, req| register(reg, req, Utc::now()).unwrap().0)
    }

    fn executor(recorder: Arc<Recorder>, dry_run: bool) -> Executor {
        Executor::new(ExecOptions {
            dry_run,
            ..Default::default()
        })
        .with_launcher(recorder)
    }

    #[test]
    fn forwards_arguments_verbatim() {
        let reg = registry();
        let pipeline = OptionPipeline::builtin();
        let recorder = Arc::new(Recorder::default());
        let exec = executor(recorder.clone(), false);
        let router = Router::new(&reg, &pipeline, &exec);

        let (_, outcome) = router.invoke("clean", &["--dry".into()], &[]).unwrap();
        assert_eq!(outcome.return_code(), 0);
        assert_eq!(recorder.calls.lock().unwrap()[0], vec!["make", "clean", "--dry"]);
    }

    #[test]
    fn dependencies_run_first_and_options_apply_to_all() {
        let reg = registry();
        let pipeline = OptionPipeline::builtin();
        let recorder = Arc::new(Recorder::default());
        let exec = executor(recorder.clone(), false);
        let router = Router::new(&reg, &pipeline, &exec);

        let inv = router
            .prepare("d", &["x".into()], &[OptionInvocation::new("chdir", "/work")])
            .unwrap();
        let names: Vec<&str> = inv.plans.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c", "b", "d"]);
        assert!(inv.plans.iter().all(|p| p.cwd == Some(PathBuf::from("/work"))));
        assert!(inv.plans[..3].iter().all(|p| p.argv.is_empty()));
        assert_eq!(inv.plans[3].argv, vec!["x"]);

        router.run(&inv).unwrap();
        assert_eq!(recorder.calls.lock().unwrap().len(), 4);
    }

    #[test]
    fn failing_prerequisite_stops_the_chain() {
        let reg = registry();
        let pipeline = OptionPipeline::builtin();
        let recorder = Arc::new(Recorder {
            fail_on: Some("c".into()),
            ..Default::default()
        });
        let exec = executor(recorder.clone(), false);
        let router = Router::new(&reg, &pipeline, &exec);

        let (inv, outcome) = router.invoke("d", &[], &[]).unwrap();
        assert_eq!(outcome.return_code(), 5);
        assert_eq!(outcome.last().unwrap().name, "c");
        assert!(outcome.stopped_early(&inv));
        assert_eq!(recorder.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn dotted_fallback_creates_no_entry() {
        let reg = registry();
        let before = reg.clone();
        let pipeline = OptionPipeline::builtin();
        let recorder = Arc::new(Recorder::default());
        let exec = executor(recorder.clone(), false);
        let router = Router::new(&reg, &pipeline, &exec);

        let (inv, _) = router.invoke("json.tool", &["data.json".into()], &[]).unwrap();
        assert!(inv.fallback);
        assert_eq!(inv.plans[0].kind, CommandKind::Module);
        assert_eq!(
            recorder.calls.lock().unwrap()[0],
            vec!["python3", "-m", "json.tool", "data.json"]
        );
        assert_eq!(reg, before);
    }

    #[test]
    fn dry_run_previews_every_step() {
        let reg = registry();
        let pipeline = OptionPipeline::builtin();
        let recorder = Arc::new(Recorder::default());
        let exec = executor(recorder.clone(), true);
        let router = Router::new(&reg, &pipeline, &exec);

        let (_, outcome) = router.invoke("d", &[], &[]).unwrap();
        assert_eq!(outcome.steps.len(), 4);
        assert!(outcome.steps.iter().all(|r| r.status == RunStatus::DryRun));
        assert_eq!(outcome.return_code(), 0);
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn unknown_name_carries_suggestions() {
        let reg = registry();
        let pipeline = OptionPipeline::builtin();
        let exec = executor(Arc::new(Recorder::default()), false);
        let router = Router::new(&reg, &pipeline, &exec).with_suggestions(1);
        match router.prepare("claen", &[], &[]).unwrap_err() {
            RouterError::UnknownCommand { suggestions, .. } => {
                assert_eq!(suggestions.0, vec!["clean".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
