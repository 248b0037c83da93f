//! Named targets callable from re-executed worker processes.
//!
//! The process pool ships a target *name* across the process boundary,
//! not the target itself. Host binaries register every process-callable
//! target at startup, before calling
//! [`maybe_run_worker`](crate::pool::process::maybe_run_worker), so the
//! worker side of the binary resolves the same names.

use crate::envelope::CallTarget;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

static TARGETS: OnceLock<RwLock<HashMap<String, Arc<dyn CallTarget>>>> = OnceLock::new();

fn targets() -> &'static RwLock<HashMap<String, Arc<dyn CallTarget>>> {
    TARGETS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a target under its name. The last registration wins.
pub fn register_target(target: Arc<dyn CallTarget>) {
    targets()
        .write()
        .insert(target.name().to_string(), target);
}

/// Look up a previously registered target.
pub fn lookup_target(name: &str) -> Option<Arc<dyn CallTarget>> {
    targets().read().get(name).cloned()
}
