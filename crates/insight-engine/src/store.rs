use crate::model::DataModel;
use std::sync::{Arc, RwLock};

/// Holds the current model snapshot.
///
/// Queries take an `Arc` to the snapshot and keep using it for their whole run; a reload swaps in
/// a fully built replacement, so no query ever sees a partially loaded model.
#[derive(Debug)]
pub struct ModelStore {
    current: RwLock<Arc<DataModel>>,
}

impl ModelStore {
    pub fn new(model: DataModel) -> Self {
        Self {
            current: RwLock::new(Arc::new(model)),
        }
    }

    pub fn snapshot(&self) -> Arc<DataModel> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replace the snapshot, returning the previous one.
    pub fn load(&self, model: DataModel) -> Arc<DataModel> {
        let next = Arc::new(model);
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        log::info!("model snapshot replaced");
        std::mem::replace(&mut *guard, next)
    }
}
