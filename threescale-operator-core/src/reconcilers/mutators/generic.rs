use crate::{error::ReconcileError, reconcilers::Mutator};

/// Objects that are only ever created, user edits are left alone.
#[derive(Debug, Clone, Copy)]
pub struct CreateOnlyMutator;

impl<K> Mutator<K> for CreateOnlyMutator {
    fn mutate(&self, _desired: &K, _existing: &mut K) -> Result<bool, ReconcileError> {
        Ok(false)
    }
}

pub fn create_only_mutator<K: 'static>() -> &'static dyn Mutator<K> {
    &CreateOnlyMutator
}
