//! tu: a named-command router.
//!
//! Register a name for a shell command, a module path or an in-process
//! callable, then run it through one entry point with arguments forwarded
//! verbatim and the exit code passed through.
//!
//! Layers, leaves first:
//!   - [`store`]: registry persistence (locked read-modify-write, atomic save)
//!   - [`name`]: FQN syntax
//!   - [`registry`]: CRUD over registered commands, as pure value transforms
//!   - [`resolve`]: registered entry, dotted-name module fallback, suggestions
//!   - [`deps`]: dependency expansion into a run order
//!   - [`options`]: global-option pipeline over execution plans
//!   - [`exec`]: per-kind execution with timeout, env overlay and dry-run
//!   - [`router`]: the above composed for one invocation

pub mod config;
pub mod deps;
pub mod error;
pub mod exec;
pub mod history;
pub mod model;
pub mod name;
pub mod options;
pub mod registry;
pub mod resolve;
pub mod router;
pub mod store;

pub use error::{Result, RouterError};
pub use model::{CommandKind, ExecutionPlan, RegisteredCommand, Registry, RunResult, RunStatus};
