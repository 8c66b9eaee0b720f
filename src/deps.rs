//! Dependency expansion: turn an entry's `depends_on` graph into a run order.
//!
//! Every prerequisite precedes its dependent and each FQN appears once. Among
//! siblings, one with a deeper prerequisite chain is scheduled first; siblings
//! of equal depth keep their declared order.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::{Cycle, Result, RouterError};
use crate::model::{RegisteredCommand, Registry};

/// Ordered run sequence for `entry`, ending with `entry` itself.
pub fn expand<'a>(registry: &'a Registry, entry: &'a RegisteredCommand) -> Result<Vec<&'a RegisteredCommand>> {
    let mut expander = Expander {
        registry,
        depth: HashMap::new(),
        stack: Vec::new(),
        seen: HashSet::new(),
        order: Vec::new(),
    };
    expander.measure(entry)?;
    expander.schedule(entry)?;
    debug!(
        entry = %entry.name,
        order = ?expander.order.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        "expanded dependencies"
    );
    Ok(expander.order)
}

struct Expander<'a> {
    registry: &'a Registry,
    /// Longest prerequisite chain below each FQN.
    depth: HashMap<&'a str, usize>,
    /// Current DFS path, for cycle reporting.
    stack: Vec<&'a str>,
    seen: HashSet<&'a str>,
    order: Vec<&'a RegisteredCommand>,
}

impl<'a> Expander<'a> {
    fn lookup(&self, dependent: &RegisteredCommand, dep: &str) -> Result<&'a RegisteredCommand> {
        self.registry
            .get(dep)
            .ok_or_else(|| RouterError::MissingDependency {
                dependent: dependent.name.clone(),
                missing: dep.to_string(),
            })
    }

    /// Depth-first pass: detect cycles and record each node's depth.
    fn measure(&mut self, cmd: &'a RegisteredCommand) -> Result<usize> {
        let fqn = cmd.name.as_str();
        if let Some(pos) = self.stack.iter().position(|n| *n == fqn) {
            let members = self.stack[pos..].iter().map(|s| s.to_string()).collect();
            return Err(RouterError::CycleError(Cycle(members)));
        }
        if let Some(d) = self.depth.get(fqn) {
            return Ok(*d);
        }

        self.stack.push(fqn);
        let mut deepest = None;
        for dep in &cmd.depends_on {
            let dep = self.lookup(cmd, dep)?;
            let d = self.measure(dep)?;
            deepest = Some(deepest.map_or(d, |m: usize| m.max(d)));
        }
        self.stack.pop();

        let d = deepest.map_or(0, |m| m + 1);
        self.depth.insert(fqn, d);
        Ok(d)
    }

    /// Post-order emission. Only called after `measure` succeeded, so the graph
    /// is acyclic and every name resolves.
    fn schedule(&mut self, cmd: &'a RegisteredCommand) -> Result<()> {
        if !self.seen.insert(cmd.name.as_str()) {
            return Ok(());
        }
        let mut deps = Vec::with_capacity(cmd.depends_on.len());
        for dep in &cmd.depends_on {
            deps.push(self.lookup(cmd, dep)?);
        }
        // Stable: equal depths keep declared order.
        deps.sort_by_key(|d| std::cmp::Reverse(self.depth.get(d.name.as_str()).copied().unwrap_or(0)));
        for dep in deps {
            self.schedule(dep)?;
        }
        self.order.push(cmd);
        Ok(())
    }
}
