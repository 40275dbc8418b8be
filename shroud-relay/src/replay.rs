//! Durable set of consumed payment references.
//!
//! A reference is marked used *before* the side-effecting ledger call and
//! released again if that call fails, so two concurrent requests racing on
//! the same payment serialize on the atomic insert here and a crash can
//! never re-admit an already-spent reference.

use std::{
    collections::HashSet,
    path::Path,
    sync::{Arc, Mutex},
};

#[derive(Debug, thiserror::Error)]
pub enum ReplayStoreError {
    #[error("payment reference already used")]
    AlreadyUsed,
    #[error("reference store error: {0}")]
    Store(String),
}

enum Backend {
    Memory(Mutex<HashSet<String>>),
    Durable(sled::Db),
}

#[derive(Clone)]
pub struct UsedReferenceStore {
    backend: Arc<Backend>,
}

impl UsedReferenceStore {
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(Backend::Memory(Mutex::new(HashSet::new()))),
        }
    }

    pub fn durable(path: impl AsRef<Path>) -> Result<Self, ReplayStoreError> {
        let db = sled::open(path.as_ref())
            .map_err(|err| ReplayStoreError::Store(err.to_string()))?;
        Ok(Self {
            backend: Arc::new(Backend::Durable(db)),
        })
    }

    /// Atomically mark the reference used. Exactly one of any number of
    /// concurrent callers wins.
    pub fn try_mark(&self, reference: &str) -> Result<(), ReplayStoreError> {
        match &*self.backend {
            Backend::Memory(set) => {
                let mut guard = set.lock().expect("reference store poisoned");
                if !guard.insert(reference.to_string()) {
                    return Err(ReplayStoreError::AlreadyUsed);
                }
                Ok(())
            }
            Backend::Durable(db) => {
                let previous = db
                    .insert(reference.as_bytes(), &[])
                    .map_err(|err| ReplayStoreError::Store(err.to_string()))?;
                if previous.is_some() {
                    return Err(ReplayStoreError::AlreadyUsed);
                }
                db.flush()
                    .map_err(|err| ReplayStoreError::Store(err.to_string()))?;
                Ok(())
            }
        }
    }

    /// Roll a mark back after the guarded action failed, making the same
    /// payment usable for a retry.
    pub fn release(&self, reference: &str) -> Result<(), ReplayStoreError> {
        match &*self.backend {
            Backend::Memory(set) => {
                set.lock()
                    .expect("reference store poisoned")
                    .remove(reference);
                Ok(())
            }
            Backend::Durable(db) => {
                db.remove(reference.as_bytes())
                    .map_err(|err| ReplayStoreError::Store(err.to_string()))?;
                db.flush()
                    .map_err(|err| ReplayStoreError::Store(err.to_string()))?;
                Ok(())
            }
        }
    }

    pub fn contains(&self, reference: &str) -> Result<bool, ReplayStoreError> {
        match &*self.backend {
            Backend::Memory(set) => Ok(set
                .lock()
                .expect("reference store poisoned")
                .contains(reference)),
            Backend::Durable(db) => db
                .contains_key(reference.as_bytes())
                .map_err(|err| ReplayStoreError::Store(err.to_string())),
        }
    }
}
