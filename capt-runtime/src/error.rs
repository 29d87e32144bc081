use thiserror::Error;

use crate::store;

/// Reasons a reconciliation can fail
///
/// Waiting on another controller is not an error; reconcilers return an idle
/// [`Action`](kube::runtime::controller::Action) for that instead.
#[derive(Error, Debug)]
pub enum Error {
    /// The reconciler has no store to talk to
    #[error("client is not configured")]
    MissingClient,

    /// A namespaced object came without a namespace
    #[error("object has no namespace")]
    MissingNamespace,

    /// An object lacks a field needed to address or own it
    #[error("object is missing {0}")]
    MissingObjectKey(&'static str),

    /// The owning `Machine` has no Kubernetes version
    #[error("machine does not have version set")]
    MachineVersionEmpty,

    /// The owning `Machine` names no cluster
    #[error("getting cluster from metadata: machine has no cluster name")]
    MissingClusterName,

    /// The machine's `Cluster` could not be fetched
    #[error("getting cluster from metadata: {0}")]
    ClusterLookup(#[source] store::Error),

    /// The `Cluster` has no infrastructure reference
    #[error("getting infrastructure cluster object: cluster has no infrastructure reference")]
    MissingInfrastructureRef,

    /// The `TinkerbellCluster` could not be fetched
    #[error("getting infrastructure cluster object: {0}")]
    InfraClusterLookup(#[source] store::Error),

    /// The bootstrap data secret could not be fetched
    #[error("getting bootstrap data secret: {0}")]
    BootstrapSecretLookup(#[source] store::Error),

    /// The bootstrap data secret has no `value` key
    #[error("retrieving bootstrap data: secret value key is missing")]
    MissingBootstrapDataSecretValueKey,

    /// The bootstrap data secret holds an empty payload
    #[error("received bootstrap user data is empty")]
    BootstrapUserDataEmpty,

    /// Every `Hardware` in the namespace is claimed
    #[error("no hardware available")]
    NoHardwareAvailable,

    /// The claimed `Hardware` has no DHCP address to report
    #[error("hardware {0} has no DHCP IP address on any interface")]
    HardwareFirstInterfaceDhcpMissingIp(String),

    /// The claimed `Hardware` has no disk to install the OS on
    #[error("hardware {0} has no disks")]
    HardwareMissingDisk(String),

    /// Neither the `Cluster` nor the `TinkerbellCluster` has an endpoint
    #[error("control plane endpoint is not set")]
    ControlPlaneEndpointNotSet,

    /// A store call failed
    #[error("{context}: {source}")]
    Store {
        /// What was being done
        context: &'static str,
        /// The store failure
        #[source]
        source: store::Error,
    },

    /// The default template could not be serialized
    #[error("rendering template: {0}")]
    Render(#[source] serde_yaml::Error),
}

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// A conditional write lost a race and the whole attempt can be retried right away
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Store { source, .. } if source.is_conflict())
    }

    /// The failure may go away by itself, as opposed to needing someone to fix an object
    pub fn is_transient(&self) -> bool {
        match self {
            Error::NoHardwareAvailable
            | Error::ClusterLookup(_)
            | Error::InfraClusterLookup(_)
            | Error::BootstrapSecretLookup(_)
            | Error::Store { .. } => true,
            Error::MissingClient
            | Error::MissingNamespace
            | Error::MissingObjectKey(_)
            | Error::MachineVersionEmpty
            | Error::MissingClusterName
            | Error::MissingInfrastructureRef
            | Error::MissingBootstrapDataSecretValueKey
            | Error::BootstrapUserDataEmpty
            | Error::HardwareFirstInterfaceDhcpMissingIp(_)
            | Error::HardwareMissingDisk(_)
            | Error::ControlPlaneEndpointNotSet
            | Error::Render(_) => false,
        }
    }

    /// Short stable name of the failure, for log fields
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::MissingClient => "missing_client",
            Error::MissingNamespace => "missing_namespace",
            Error::MissingObjectKey(_) => "missing_object_key",
            Error::MachineVersionEmpty => "machine_version_empty",
            Error::MissingClusterName | Error::ClusterLookup(_) => "cluster_lookup",
            Error::MissingInfrastructureRef | Error::InfraClusterLookup(_) => "infra_cluster_lookup",
            Error::BootstrapSecretLookup(_) => "bootstrap_secret_lookup",
            Error::MissingBootstrapDataSecretValueKey => "bootstrap_value_missing",
            Error::BootstrapUserDataEmpty => "bootstrap_data_empty",
            Error::NoHardwareAvailable => "no_hardware_available",
            Error::HardwareFirstInterfaceDhcpMissingIp(_) => "hardware_missing_ip",
            Error::HardwareMissingDisk(_) => "hardware_missing_disk",
            Error::ControlPlaneEndpointNotSet => "control_plane_endpoint_not_set",
            Error::Store { source, .. } if source.is_conflict() => "conflict",
            Error::Store { .. } => "store",
            Error::Render(_) => "render",
        }
    }
}

/// Attach what was being done to a failed [`Store`](crate::Store) call
pub(crate) trait StoreResultExt<T> {
    fn context(self, context: &'static str) -> Result<T>;
}

impl<T> StoreResultExt<T> for store::Result<T> {
    fn context(self, context: &'static str) -> Result<T> {
        self.map_err(|source| Error::Store { context, source })
    }
}
