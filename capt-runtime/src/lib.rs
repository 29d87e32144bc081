//! Controllers for the Tinkerbell cluster-api infrastructure provider
//!
//! Two reconcilers live here. [`machine::reconcile_machine`] assigns bare metal [`Hardware`]
//! to cluster-api machines and drives it through a Tinkerbell provisioning workflow;
//! [`cluster::reconcile_cluster`] settles the control plane endpoint between a `Cluster` and
//! its `TinkerbellCluster`.
//!
//! Both work against the [`Store`] abstraction, so they run the same against a real API
//! server ([`KubeStore`]) and in process ([`MemoryStore`]). [`controller::run`] binds them to
//! watch streams through `kube::runtime`.
//!
//! [`Hardware`]: capt_core::Hardware

pub mod allocator;
pub use allocator::Allocator;

pub mod cluster;
pub mod controller;
pub use controller::{Config, Context};

mod error;
pub use error::{Error, Result};

pub mod machine;

pub mod store;
pub use store::{KubeStore, MemoryStore, Store};

pub mod template;
pub use template::{ArtifactBuilder, Artifacts, ImageLookup};
