//! Explicitly lifetimed holder for the heavyweight prover handle.
//!
//! Toolchain handles are expensive to construct, so deployments keep one
//! per process, but as an owned value with a teardown path, not ambient
//! global state, so tests can substitute a fresh instance per run.

use std::sync::{Arc, Mutex};

use crate::inner::InnerProver;

type ProverFactory = Box<dyn Fn() -> Arc<dyn InnerProver> + Send + Sync>;

pub struct ProverContext {
    factory: ProverFactory,
    handle: Mutex<Option<Arc<dyn InnerProver>>>,
}

impl ProverContext {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Arc<dyn InnerProver> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            handle: Mutex::new(None),
        }
    }

    /// Lazily build and return the shared handle.
    pub fn handle(&self) -> Arc<dyn InnerProver> {
        let mut guard = self.handle.lock().expect("prover context poisoned");
        guard.get_or_insert_with(|| (self.factory)()).clone()
    }

    /// Drop the current handle; the next [`Self::handle`] call rebuilds it.
    pub fn teardown(&self) {
        let mut guard = self.handle.lock().expect("prover context poisoned");
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::inner::DevProver;

    #[test]
    fn handle_is_built_lazily_and_rebuilt_after_teardown() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let context = ProverContext::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(DevProver::new(1)) as Arc<dyn InnerProver>
        });
        assert_eq!(builds.load(Ordering::SeqCst), 0);

        let first = context.handle();
        let second = context.handle();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));

        context.teardown();
        let _third = context.handle();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }
}
