//! Ambient per-run context, propagated explicitly into workers.
//!
//! A controller snapshots the context it was called under with
//! [`RunContext::current`] and restores it inside each worker via
//! [`RunContext::install`], so nested diagnostics stay attributable to
//! the correct logical run even across thread and process boundaries.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;

/// Identity of the logical run a piece of work belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    /// Identifier of the enclosing run, if any.
    pub run_id: Option<String>,
    /// Label path accumulated as work fans out, outermost first.
    pub labels: Vec<String>,
}

thread_local! {
    static CURRENT: RefCell<RunContext> = RefCell::new(RunContext::default());
}

impl RunContext {
    /// Context for a fresh run.
    pub fn new<S: Into<String>>(run_id: S) -> Self {
        Self {
            run_id: Some(run_id.into()),
            labels: Vec::new(),
        }
    }

    /// Snapshot of the calling thread's context.
    pub fn current() -> RunContext {
        CURRENT.with(|c| c.borrow().clone())
    }

    /// Derived context for one unit of work fanned out from this one.
    pub fn child<S: Into<String>>(&self, label: S) -> RunContext {
        let mut child = self.clone();
        child.labels.push(label.into());
        child
    }

    /// Label path rendered for log attribution, e.g. `"provision/reboot"`.
    pub fn label_path(&self) -> String {
        self.labels.join("/")
    }

    /// Make this context current for the enclosing scope. The previous
    /// context is restored when the returned guard drops.
    pub fn install(self) -> ContextGuard {
        let previous = CURRENT.with(|c| c.replace(self));
        ContextGuard { previous }
    }
}

/// Restores the previously current context on drop.
#[derive(Debug)]
pub struct ContextGuard {
    previous: RunContext,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = std::mem::take(&mut self.previous);
        CURRENT.with(|c| {
            *c.borrow_mut() = previous;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_restore() {
        assert_eq!(RunContext::current(), RunContext::default());

        let ctx = RunContext::new("run-7");
        {
            let _guard = ctx.clone().install();
            assert_eq!(RunContext::current(), ctx);

            {
                let _inner = ctx.child("provision").install();
                assert_eq!(RunContext::current().label_path(), "provision");
            }

            assert_eq!(RunContext::current(), ctx);
        }

        assert_eq!(RunContext::current(), RunContext::default());
    }

    #[test]
    fn test_child_extends_label_path() {
        let ctx = RunContext::new("run-9").child("boot").child("vm-2");
        assert_eq!(ctx.label_path(), "boot/vm-2");
        assert_eq!(ctx.run_id.as_deref(), Some("run-9"));
    }

    #[test]
    fn test_context_is_thread_local() {
        let _guard = RunContext::new("outer").install();

        let handle = std::thread::spawn(|| RunContext::current());
        assert_eq!(handle.join().unwrap(), RunContext::default());
    }
}
