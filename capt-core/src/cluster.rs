//! The slice of the upstream cluster-api types that the provider reads and writes
//!
//! Only the fields the provider consumes are modelled. The provider only ever writes
//! [`ClusterSpec::control_plane_endpoint`], everything else in the spec is carried through
//! [`ClusterSpec::other`].
use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::labels::{CLUSTER_NAME_LABEL, PAUSED_ANNOTATION};

/// Desired state of a cluster-api `Cluster`
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "cluster.x-k8s.io", version = "v1beta1", kind = "Cluster", namespaced)]
#[kube(status = "ClusterStatus")]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Stops all reconciliation of the cluster and its descendants
    #[serde(default)]
    pub paused: bool,

    /// Endpoint used to reach the workload cluster's API server
    #[serde(default)]
    pub control_plane_endpoint: ApiEndpoint,

    /// The provider specific cluster object, a `TinkerbellCluster` for this provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,

    /// Fields owned by cluster-api that the provider passes through untouched
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// Observed state of a cluster-api `Cluster`
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Mirrors the readiness of the infrastructure cluster
    #[serde(default)]
    pub infrastructure_ready: bool,

    /// Lifecycle phase as reported by cluster-api
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl Cluster {
    /// Whether reconciliation was paused through the spec flag or the pause annotation
    pub fn is_paused(&self) -> bool {
        self.spec.paused || crate::meta::has_annotation(&self.metadata, PAUSED_ANNOTATION)
    }
}

/// Desired state of a cluster-api `Machine`
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "cluster.x-k8s.io", version = "v1beta1", kind = "Machine", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Name of the cluster this machine belongs to
    #[serde(default)]
    pub cluster_name: String,

    /// Where to find the node's bootstrap payload
    #[serde(default)]
    pub bootstrap: Bootstrap,

    /// Kubernetes version the node should run, e.g. `v1.19.4`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Copied from the infrastructure machine once it is provisioned
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// The provider specific machine object, a `TinkerbellMachine` for this provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,
}

/// Reference to the bootstrap data for a machine
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// Name of the secret holding the bootstrap payload under the `value` key
    ///
    /// Unset until the bootstrap provider has produced the data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

impl Machine {
    /// The non-empty Kubernetes version requested for this machine
    pub fn version(&self) -> Option<&str> {
        self.spec.version.as_deref().filter(|v| !v.is_empty())
    }

    /// Name of the owning cluster, taken from the cluster name label first and the spec second
    pub fn cluster_name(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(CLUSTER_NAME_LABEL))
            .map(String::as_str)
            .filter(|name| !name.is_empty())
            .or_else(|| Some(self.spec.cluster_name.as_str()).filter(|name| !name.is_empty()))
    }

    /// Name of the bootstrap data secret, if the bootstrap provider produced one yet
    pub fn bootstrap_secret_name(&self) -> Option<&str> {
        self.spec
            .bootstrap
            .data_secret_name
            .as_deref()
            .filter(|name| !name.is_empty())
    }
}

/// Host and port of a Kubernetes API server
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    /// Hostname or IP address
    #[serde(default)]
    pub host: String,

    /// TCP port, zero when unset
    #[serde(default)]
    pub port: i32,
}

impl ApiEndpoint {
    /// An endpoint counts as set as soon as it has a host
    pub fn is_set(&self) -> bool {
        !self.host.is_empty()
    }

    /// Returns the endpoint with a zero port replaced by `port`
    #[must_use]
    pub fn with_default_port(mut self, port: i32) -> Self {
        if self.port == 0 {
            self.port = port;
        }
        self
    }
}

impl std::fmt::Display for ApiEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A loosely typed reference to another object
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Kind of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Name of the referent
    #[serde(default)]
    pub name: String,

    /// Namespace of the referent, defaults to the referrer's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}
