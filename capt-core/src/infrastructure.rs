//! Custom resources owned by this provider
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{cluster::ApiEndpoint, labels::PAUSED_ANNOTATION};

/// TinkerbellClusterSpec defines the desired state of a `TinkerbellCluster`
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "TinkerbellCluster",
    namespaced,
    status = "TinkerbellClusterStatus",
    category = "cluster-api",
    printcolumn = r#"{"name":"Cluster", "type":"string", "description":"Cluster to which this TinkerbellCluster belongs", "jsonPath":".metadata.labels.cluster\\.x-k8s\\.io/cluster-name"}"#,
    printcolumn = r#"{"name":"Ready", "type":"boolean", "description":"TinkerbellCluster ready status", "jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TinkerbellClusterSpec {
    /// Endpoint used to communicate with the control plane
    ///
    /// Either supplied by the user or copied over from the owning `Cluster`.
    #[serde(default)]
    pub control_plane_endpoint: ApiEndpoint,

    /// Cluster wide default for [`TinkerbellMachineSpec::image_lookup_format`]
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_lookup_format: String,

    /// Cluster wide default for [`TinkerbellMachineSpec::image_lookup_base_registry`]
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_lookup_base_registry: String,

    /// Cluster wide default for [`TinkerbellMachineSpec::image_lookup_os_distro`]
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_lookup_os_distro: String,

    /// Cluster wide default for [`TinkerbellMachineSpec::image_lookup_os_version`]
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_lookup_os_version: String,
}

/// TinkerbellClusterStatus defines the observed state of a `TinkerbellCluster`
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TinkerbellClusterStatus {
    /// The infrastructure is ready to host machines
    #[serde(default)]
    pub ready: bool,
}

impl TinkerbellCluster {
    /// Whether the pause annotation is present
    pub fn is_paused(&self) -> bool {
        crate::meta::has_annotation(&self.metadata, PAUSED_ANNOTATION)
    }

    /// Whether the cluster has been marked ready
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|status| status.ready)
    }
}

/// TinkerbellMachineSpec defines the desired state of a `TinkerbellMachine`
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "TinkerbellMachine",
    namespaced,
    status = "TinkerbellMachineStatus",
    category = "cluster-api",
    printcolumn = r#"{"name":"Cluster", "type":"string", "description":"Cluster to which this TinkerbellMachine belongs", "jsonPath":".metadata.labels.cluster\\.x-k8s\\.io/cluster-name"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "description":"Tinkerbell instance state", "jsonPath":".status.instanceStatus"}"#,
    printcolumn = r#"{"name":"Ready", "type":"boolean", "description":"Machine ready status", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"InstanceID", "type":"string", "description":"Tinkerbell instance ID", "jsonPath":".spec.providerID"}"#,
    printcolumn = r#"{"name":"Machine", "type":"string", "description":"Machine object which owns this TinkerbellMachine", "jsonPath":".metadata.ownerReferences[?(@.kind==\"Machine\")].name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TinkerbellMachineSpec {
    /// URL naming format for machine images
    ///
    /// Supports the substitutions `{{.BaseRegistry}}`, `{{.OSDistro}}`, `{{.OSVersion}}` and
    /// `{{.KubernetesVersion}}`. Falls back to the cluster's format and then to
    /// `{{.BaseRegistry}}/{{.OSDistro}}-{{.OSVersion}}:{{.KubernetesVersion}}.gz`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_lookup_format: String,

    /// Base registry URL used for pulling images
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_lookup_base_registry: String,

    /// Name of the OS distribution, `ubuntu` when unset
    #[serde(default, rename = "imageLookupOSDistro", skip_serializing_if = "String::is_empty")]
    pub image_lookup_os_distro: String,

    /// Version of the OS distribution, defaulted from the distribution when unset
    #[serde(default, rename = "imageLookupOSVersion", skip_serializing_if = "String::is_empty")]
    pub image_lookup_os_version: String,

    /// Replaces the default Tinkerbell template used to provision the hardware
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub template_override: String,

    /// Name of the claimed `Hardware`
    ///
    /// Set once by the controller and immutable until the machine is deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_name: Option<String>,

    /// Provider identifier embedding the claimed hardware's id
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// TinkerbellMachineStatus defines the observed state of a `TinkerbellMachine`
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TinkerbellMachineStatus {
    /// True once hardware is claimed, addressed and its provisioning artifacts exist
    #[serde(default)]
    pub ready: bool,

    /// Addresses of the claimed hardware
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    /// Provisioning state of the Tinkerbell workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_status: Option<InstanceStatus>,

    /// Terminal problem that needs manual intervention
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<MachineStatusError>,

    /// Human readable description of [`Self::error_reason`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TinkerbellMachine {
    /// The claimed hardware, if the claim was persisted already
    pub fn hardware_name(&self) -> Option<&str> {
        self.spec.hardware_name.as_deref().filter(|name| !name.is_empty())
    }

    /// The user supplied template, if any
    pub fn template_override(&self) -> Option<&str> {
        Some(self.spec.template_override.as_str()).filter(|t| !t.trim().is_empty())
    }

    /// Whether the machine has been marked ready
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|status| status.ready)
    }
}

/// A single address of a machine
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct MachineAddress {
    /// Kind of address
    #[serde(rename = "type")]
    pub type_: MachineAddressType,

    /// The address itself
    pub address: String,
}

impl MachineAddress {
    /// An address reachable from within the cluster's network
    pub fn internal_ip(address: impl Into<String>) -> Self {
        Self {
            type_: MachineAddressType::InternalIP,
            address: address.into(),
        }
    }
}

/// Kinds of [`MachineAddress`]
#[allow(clippy::upper_case_acronyms)]
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[allow(missing_docs)]
pub enum MachineAddressType {
    Hostname,
    ExternalIP,
    InternalIP,
    ExternalDNS,
    InternalDNS,
}

/// Provisioning state of the hardware behind a machine, following the workflow
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[allow(missing_docs)]
pub enum InstanceStatus {
    Pending,
    Provisioning,
    Provisioned,
    Failed,
    Timeout,
}

/// Terminal machine errors, as understood by cluster-api
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[allow(missing_docs)]
pub enum MachineStatusError {
    InvalidConfiguration,
    UnsupportedChange,
    InsufficientResources,
    CreateError,
    UpdateError,
    DeleteError,
}
