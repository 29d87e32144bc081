//! Metadata helpers shared by every resource the provider touches
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;

pub(crate) fn has_annotation(meta: &ObjectMeta, key: &str) -> bool {
    meta.annotations
        .as_ref()
        .is_some_and(|annotations| annotations.contains_key(key))
}

/// Finalizer and ownership bookkeeping on any [`Resource`]
pub trait MetaExt: Resource {
    /// Whether `finalizer` is present
    fn has_finalizer(&self, finalizer: &str) -> bool {
        self.meta()
            .finalizers
            .as_ref()
            .is_some_and(|finalizers| finalizers.iter().any(|f| f == finalizer))
    }

    /// Adds `finalizer`, returning whether the object changed
    fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.meta_mut()
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(finalizer.to_string());
        true
    }

    /// Removes `finalizer`, returning whether the object changed
    fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let Some(finalizers) = self.meta_mut().finalizers.as_mut() else {
            return false;
        };
        let before = finalizers.len();
        finalizers.retain(|f| f != finalizer);
        before != finalizers.len()
    }

    /// Whether a deletion was requested and is waiting on finalizers
    fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    /// The first owner reference of `kind` whose API group is `group`
    fn owner_of_kind(&self, group: &str, kind: &str) -> Option<&OwnerReference> {
        self.meta()
            .owner_references
            .iter()
            .flatten()
            .find(|owner| owner.kind == kind && api_group(&owner.api_version) == group)
    }
}

impl<K: Resource> MetaExt for K {}

fn api_group(api_version: &str) -> &str {
    match api_version.split_once('/') {
        Some((group, _version)) => group,
        None => "",
    }
}
