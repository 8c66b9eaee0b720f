//! Global-option pipeline.
//!
//! Each option is a named plan transformation. The pipeline is built once at
//! startup and applies the invocations in the order the caller gave them.

use std::collections::HashSet;
use std::num::NonZeroU64;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{Result, RouterError};
use crate::model::ExecutionPlan;

/// A plan transformation selectable by name.
pub trait PlanOption: Send + Sync {
    fn name(&self) -> &str;

    /// Rewrite `plan` using this option's raw arguments.
    fn transform(&self, plan: ExecutionPlan, args: &[String]) -> Result<ExecutionPlan>;
}

/// One use of an option on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionInvocation {
    pub name: String,
    pub args: Vec<String>,
}

impl OptionInvocation {
    pub fn new(name: impl Into<String>, arg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: vec![arg.into()],
        }
    }
}

fn single_arg<'a>(option: &str, args: &'a [String]) -> Result<&'a str> {
    match args {
        [one] => Ok(one.as_str()),
        _ => Err(RouterError::InvalidRequest(format!(
            "option '{option}' takes exactly one argument, got {}",
            args.len()
        ))),
    }
}

/* ---- Built-in options ---- */

/// Run the target in another directory. Only `cwd` changes.
pub struct Chdir;

impl PlanOption for Chdir {
    fn name(&self) -> &str {
        "chdir"
    }

    fn transform(&self, mut plan: ExecutionPlan, args: &[String]) -> Result<ExecutionPlan> {
        let raw = single_arg(self.name(), args)?;
        if raw.is_empty() {
            return Err(RouterError::InvalidRequest("chdir needs a directory".into()));
        }
        let dir = PathBuf::from(raw);
        // Relative paths stack on an earlier chdir.
        plan.cwd = Some(match (&plan.cwd, dir.is_relative()) {
            (Some(base), true) => base.join(dir),
            _ => dir,
        });
        Ok(plan)
    }
}

/// Add `KEY=VALUE` to the environment overlay.
pub struct EnvOverlay;

impl PlanOption for EnvOverlay {
    fn name(&self) -> &str {
        "env"
    }

    fn transform(&self, mut plan: ExecutionPlan, args: &[String]) -> Result<ExecutionPlan> {
        let raw = single_arg(self.name(), args)?;
        let (key, value) = parse_assignment(raw)?;
        plan.env_overlay.insert(key, value);
        Ok(plan)
    }
}

/// Override the timeout in seconds.
pub struct Timeout;

impl PlanOption for Timeout {
    fn name(&self) -> &str {
        "timeout"
    }

    fn transform(&self, mut plan: ExecutionPlan, args: &[String]) -> Result<ExecutionPlan> {
        let raw = single_arg(self.name(), args)?;
        let secs = raw
            .trim()
            .parse::<NonZeroU64>()
            .map_err(|_| RouterError::InvalidRequest(format!("timeout must be a positive number of seconds, got '{raw}'")))?;
        plan.timeout_seconds = Some(secs);
        Ok(plan)
    }
}

/// Split `KEY=VALUE`. The key must be non-empty; the value may be empty.
pub fn parse_assignment(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((k, v)) if !k.is_empty() && !k.contains('\0') => Ok((k.to_string(), v.to_string())),
        _ => Err(RouterError::InvalidRequest(format!(
            "expected KEY=VALUE, got '{raw}'"
        ))),
    }
}

/* ---- Pipeline ---- */

pub struct OptionPipeline {
    options: Vec<Box<dyn PlanOption>>,
}

impl std::fmt::Debug for OptionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl OptionPipeline {
    /// Fails with `DuplicateOption` if two options share a name.
    pub fn new(options: Vec<Box<dyn PlanOption>>) -> Result<Self> {
        let mut names = HashSet::new();
        for opt in &options {
            if !names.insert(opt.name().to_string()) {
                return Err(RouterError::DuplicateOption(opt.name().to_string()));
            }
        }
        Ok(Self { options })
    }

    /// `chdir`, `env` and `timeout`.
    pub fn builtin() -> Self {
        Self {
            options: vec![Box::new(Chdir), Box::new(EnvOverlay), Box::new(Timeout)],
        }
    }

    /// Builtins plus `extra`, checked for name clashes.
    pub fn with_extra(extra: Vec<Box<dyn PlanOption>>) -> Result<Self> {
        let mut options = Self::builtin().options;
        options.extend(extra);
        Self::new(options)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.options.iter().map(|o| o.name())
    }

    /// Apply `invocations` in order.
    pub fn apply(&self, mut plan: ExecutionPlan, invocations: &[OptionInvocation]) -> Result<ExecutionPlan> {
        for inv in invocations {
            let option = self
                .options
                .iter()
                .find(|o| o.name() == inv.name)
                .ok_or_else(|| RouterError::UnknownOption(inv.name.clone()))?;
            plan = option.transform(plan, &inv.args)?;
            debug!(option = %inv.name, args = ?inv.args, "applied global option");
        }
        Ok(plan)
    }
}

impl Default for OptionPipeline {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CommandKind;

    fn plan() -> ExecutionPlan {
        let mut p = ExecutionPlan::new("clean", CommandKind::Shell, "make clean");
        p.argv = vec!["--dry".into()];
        p
    }

    #[test]
    fn chdir_only_touches_cwd() {
        let out = OptionPipeline::builtin()
            .apply(plan(), &[OptionInvocation::new("chdir", "/tmp/work")])
            .unwrap();
        let mut expected = plan();
        expected.cwd = Some(PathBuf::from("/tmp/work"));
        assert_eq!(out, expected);
    }

    #[test]
    fn options_compose_in_given_order() {
        let pipeline = OptionPipeline::builtin();
        let out = pipeline
            .apply(
                plan(),
                &[
                    OptionInvocation::new("chdir", "/srv"),
                    OptionInvocation::new("env", "MODE=a"),
                    OptionInvocation::new("chdir", "app"),
                    OptionInvocation::new("env", "MODE=b"),
                    OptionInvocation::new("timeout", "10"),
                ],
            )
            .unwrap();
        assert_eq!(out.cwd, Some(PathBuf::from("/srv/app")));
        assert_eq!(out.env_overlay.get("MODE").map(String::as_str), Some("b"));
        assert_eq!(out.timeout_seconds.map(|t| t.get()), Some(10));
        assert_eq!(out.argv, vec!["--dry"]);
    }

    #[test]
    fn unknown_option_is_rejected() {
        let err = OptionPipeline::builtin()
            .apply(plan(), &[OptionInvocation::new("nice", "5")])
            .unwrap_err();
        assert!(matches!(err, RouterError::UnknownOption(n) if n == "nice"));
    }

    #[test]
    fn duplicate_option_fails_at_construction() {
        let err = OptionPipeline::with_extra(vec![Box::new(Chdir)]).unwrap_err();
        assert!(matches!(err, RouterError::DuplicateOption(n) if n == "chdir"));
    }

    #[test]
    fn bad_arguments_are_invalid_requests() {
        let pipeline = OptionPipeline::builtin();
        for inv in [
            OptionInvocation::new("timeout", "0"),
            OptionInvocation::new("timeout", "soon"),
            OptionInvocation::new("env", "NOEQUALS"),
            OptionInvocation::new("env", "=value"),
        ] {
            assert!(matches!(
                pipeline.apply(plan(), &[inv]),
                Err(RouterError::InvalidRequest(_))
            ));
        }
    }

    struct Upper;

    impl PlanOption for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn transform(&self, mut plan: ExecutionPlan, _args: &[String]) -> Result<ExecutionPlan> {
            plan.argv = plan.argv.iter().map(|a| a.to_uppercase()).collect();
            Ok(plan)
        }
    }

    #[test]
    fn extra_options_plug_in() {
        let pipeline = OptionPipeline::with_extra(vec![Box::new(Upper)]).unwrap();
        let out = pipeline
            .apply(plan(), &[OptionInvocation { name: "upper".into(), args: vec![] }])
            .unwrap();
        assert_eq!(out.argv, vec!["--DRY"]);
        assert_eq!(pipeline.names().collect::<Vec<_>>(), vec!["chdir", "env", "timeout", "upper"]);
    }
}
