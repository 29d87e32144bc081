//! Resource types for the Tinkerbell cluster-api infrastructure provider
//!
//! This crate holds the client-less half of the provider: the custom resources it owns
//! ([`TinkerbellCluster`], [`TinkerbellMachine`]), the subset of upstream cluster-api
//! resources it reads ([`Cluster`], [`Machine`]), and the Tinkerbell inventory and
//! provisioning kinds it claims and creates ([`Hardware`], [`Template`], [`Workflow`]).
//!
//! The controllers that act on these live in `capt-runtime`.

pub mod cluster;
pub use cluster::{ApiEndpoint, Cluster, Machine, ObjectReference};

pub mod infrastructure;
pub use infrastructure::{
    InstanceStatus, MachineAddress, MachineAddressType, MachineStatusError, TinkerbellCluster,
    TinkerbellMachine,
};

pub mod tinkerbell;
pub use tinkerbell::{Hardware, Template, Workflow, WorkflowState};

pub mod labels;

pub mod meta;
pub use meta::MetaExt;
