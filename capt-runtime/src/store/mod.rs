//! Typed access to the declarative object store the controllers converge against
//!
//! Reconcilers only talk to the outside world through [`Store`]. [`KubeStore`] backs it with
//! a Kubernetes API server, [`MemoryStore`] keeps everything in process and is what the
//! behavioural tests run against.
use std::{fmt::Debug, future::Future};

use capt_core::labels::Selector;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

mod kube_store;
pub use kube_store::KubeStore;

mod memory;
pub use memory::MemoryStore;

/// Errors returned by a [`Store`]
#[derive(Error, Debug)]
pub enum Error {
    /// The addressed object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Kind of the object
        kind: String,
        /// Namespace of the object
        namespace: String,
        /// Name of the object
        name: String,
    },

    /// Creation failed because an object with the same name exists
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        /// Kind of the object
        kind: String,
        /// Namespace of the object
        namespace: String,
        /// Name of the object
        name: String,
    },

    /// A conditional write lost against a concurrent one
    #[error("{kind} {namespace}/{name} was modified concurrently")]
    Conflict {
        /// Kind of the object
        kind: String,
        /// Namespace of the object
        namespace: String,
        /// Name of the object
        name: String,
    },

    /// Any other failure talking to the API server
    #[error("api request failed: {0}")]
    Kube(#[source] kube::Error),

    /// The object could not be converted to or from its stored form
    #[error("failed to (de)serialize object: {0}")]
    Serialization(#[source] serde_json::Error),

    /// The object lacks a field needed to address it
    #[error("object is missing {0}")]
    MissingField(&'static str),
}

impl Error {
    /// Whether the addressed object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Whether a conditional write lost a race
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Whether a create collided with an existing object
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }

    pub(crate) fn not_found<K: Object>(namespace: &str, name: &str) -> Self {
        Error::NotFound {
            kind: K::kind(&()).into_owned(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn already_exists<K: Object>(namespace: &str, name: &str) -> Self {
        Error::AlreadyExists {
            kind: K::kind(&()).into_owned(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn conflict<K: Object>(namespace: &str, name: &str) -> Self {
        Error::Conflict {
            kind: K::kind(&()).into_owned(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// Result of a [`Store`] operation
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A namespaced object that can be kept in a [`Store`]
pub trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Object for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// CRUD and label filtered listing over namespaced objects
///
/// Writes are conditional on `metadata.resourceVersion` when the object carries one, and
/// deletion is gated on finalizers: while any remain, [`Store::delete`] only marks the object
/// with a deletion timestamp, and the object goes away once a replace removes the last one.
pub trait Store: Clone + Send + Sync + 'static {
    /// Fetch an object, failing with [`Error::NotFound`] if it does not exist
    fn get<K: Object>(&self, namespace: &str, name: &str) -> impl Future<Output = Result<K>> + Send;

    /// Fetch an object, mapping absence to `None`
    fn get_opt<K: Object>(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<K>>> + Send {
        async move {
            match self.get(namespace, name).await {
                Ok(obj) => Ok(Some(obj)),
                Err(err) if err.is_not_found() => Ok(None),
                Err(err) => Err(err),
            }
        }
    }

    /// List objects matching `selector`, in one namespace or across all of them
    fn list<K: Object>(
        &self,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> impl Future<Output = Result<Vec<K>>> + Send;

    /// Create an object, failing with [`Error::AlreadyExists`] on a name collision
    fn create<K: Object>(&self, obj: &K) -> impl Future<Output = Result<K>> + Send;

    /// Replace an object's metadata and spec
    ///
    /// Fails with [`Error::Conflict`] if the object changed since `obj` was read.
    fn replace<K: Object>(&self, obj: &K) -> impl Future<Output = Result<K>> + Send;

    /// Replace an object's status, leaving metadata and spec alone
    fn replace_status<K: Object>(&self, obj: &K) -> impl Future<Output = Result<K>> + Send;

    /// Request deletion of an object
    fn delete<K: Object>(&self, namespace: &str, name: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Namespace and name of an object that is about to be written
pub(crate) fn object_key<K: Object>(obj: &K) -> Result<(&str, &str)> {
    let meta = obj.meta();
    let namespace = meta
        .namespace
        .as_deref()
        .ok_or(Error::MissingField(".metadata.namespace"))?;
    let name = meta.name.as_deref().ok_or(Error::MissingField(".metadata.name"))?;
    Ok((namespace, name))
}
