//! In-process callables.
//!
//! A callable target `module:function` names an entry in a [`CallableTable`]
//! built at startup. Callables see their arguments, working directory and
//! environment overlay through [`CallContext`]; they never change the process
//! environment or working directory.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// What a callable reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// Returned normally with nothing to report (exit code 0).
    Success,
    /// Returned an explicit exit code.
    Exit(i32),
    /// Failed during invocation; carries diagnostic detail.
    Failed(String),
}

impl CallOutcome {
    pub fn return_code(&self) -> i32 {
        match self {
            CallOutcome::Success => 0,
            CallOutcome::Exit(code) => *code,
            CallOutcome::Failed(_) => 1,
        }
    }
}

/// Invocation context handed to a callable.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env_overlay: BTreeMap<String, String>,
    capture: bool,
    stdout: String,
    stderr: String,
}

impl CallContext {
    pub fn new(args: Vec<String>, capture: bool) -> Self {
        Self {
            args,
            capture,
            ..Default::default()
        }
    }

    /// Overlay first, then the inherited environment.
    pub fn var(&self, key: &str) -> Option<String> {
        self.env_overlay
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    }

    /// The environment the callable would hand to a child process.
    pub fn effective_env(&self) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = std::env::vars().collect();
        env.extend(self.env_overlay.clone());
        env
    }

    pub fn print(&mut self, text: impl fmt::Display) {
        if self.capture {
            self.stdout.push_str(&text.to_string());
        } else {
            let _ = write!(std::io::stdout().lock(), "{text}");
        }
    }

    pub fn println(&mut self, text: impl fmt::Display) {
        self.print(format_args!("{text}\n"));
    }

    pub fn eprintln(&mut self, text: impl fmt::Display) {
        if self.capture {
            self.stderr.push_str(&format!("{text}\n"));
        } else {
            let _ = writeln!(std::io::stderr().lock(), "{text}");
        }
    }

    /// Captured output, when capture was requested.
    pub fn take_output(&mut self) -> (Option<String>, Option<String>) {
        if self.capture {
            (
                Some(std::mem::take(&mut self.stdout)),
                Some(std::mem::take(&mut self.stderr)),
            )
        } else {
            (None, None)
        }
    }
}

pub type CallableFn = dyn Fn(&mut CallContext) -> CallOutcome + Send + Sync;

/// `module:function` -> implementation.
#[derive(Clone, Default)]
pub struct CallableTable {
    entries: BTreeMap<String, Arc<CallableFn>>,
}

impl fmt::Debug for CallableTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl CallableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table preloaded with the `builtins:*` callables.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        table.insert("builtins:echo", builtin_echo);
        table.insert("builtins:env", builtin_env);
        table.insert("builtins:true", |_: &mut CallContext| CallOutcome::Success);
        table.insert("builtins:false", |_: &mut CallContext| CallOutcome::Exit(1));
        table.insert("builtins:sleep", builtin_sleep);
        table
    }

    /// Add or replace an entry.
    pub fn insert<F>(&mut self, target: impl Into<String>, f: F)
    where
        F: Fn(&mut CallContext) -> CallOutcome + Send + Sync + 'static,
    {
        self.entries.insert(target.into(), Arc::new(f));
    }

    pub fn get(&self, target: &str) -> Option<Arc<CallableFn>> {
        self.entries.get(target).cloned()
    }

    pub fn contains(&self, target: &str) -> bool {
        self.entries.contains_key(target)
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Run `f`, turning a panic into `CallOutcome::Failed`.
pub fn invoke(f: &CallableFn, ctx: &mut CallContext) -> CallOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| f(ctx))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "callable panicked".to_string());
            CallOutcome::Failed(format!("panic: {detail}"))
        }
    }
}

/* ---- Builtins ---- */

fn builtin_echo(ctx: &mut CallContext) -> CallOutcome {
    let line = ctx.args.join(" ");
    ctx.println(line);
    CallOutcome::Success
}

fn builtin_env(ctx: &mut CallContext) -> CallOutcome {
    let env = ctx.effective_env();
    let keys: Vec<&String> = if ctx.args.is_empty() {
        env.keys().collect()
    } else {
        ctx.args.iter().collect()
    };
    let mut missing = false;
    let mut lines = Vec::with_capacity(keys.len());
    for key in keys {
        match env.get(key) {
            Some(v) => lines.push(format!("{key}={v}")),
            None => missing = true,
        }
    }
    for line in lines {
        ctx.println(line);
    }
    if missing {
        CallOutcome::Exit(1)
    } else {
        CallOutcome::Success
    }
}

fn builtin_sleep(ctx: &mut CallContext) -> CallOutcome {
    let raw = ctx.args.first().map(String::as_str).unwrap_or("1");
    match raw.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => {
            std::thread::sleep(Duration::from_secs_f64(secs));
            CallOutcome::Success
        }
        _ => CallOutcome::Failed(format!("sleep: invalid duration '{raw}'")),
    }
}
