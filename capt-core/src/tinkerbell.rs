//! Tinkerbell inventory and provisioning resources
//!
//! [`Hardware`] is the pre-existing inventory that machines are allocated from, while
//! [`Template`] and [`Workflow`] are created per machine to drive the actual provisioning.
use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::labels::{HARDWARE_OWNER_NAMESPACE_LABEL, HARDWARE_OWNER_NAME_LABEL};

/// HardwareSpec defines the desired state of `Hardware`
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "tinkerbell.org",
    version = "v1alpha1",
    kind = "Hardware",
    plural = "hardware",
    namespaced,
    status = "HardwareStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct HardwareSpec {
    /// Stable identifier of the physical machine
    #[serde(default)]
    pub id: String,
    /// Fields not modelled here, carried through replaces untouched
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// HardwareStatus defines the observed state of `Hardware`
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HardwareStatus {
    /// Inventory state as reported by Tinkerbell
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Block devices, in boot order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,

    /// Network interfaces, in boot order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
    /// Fields not modelled here, carried through replaces untouched
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// A block device
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Disk {
    /// Device path, e.g. `/dev/sda`
    #[serde(default)]
    pub device: String,
    /// Fields not modelled here, carried through replaces untouched
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// A network interface
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Interface {
    /// DHCP configuration of the interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<Dhcp>,
    /// Fields not modelled here, carried through replaces untouched
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// DHCP lease handed out to an interface
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Dhcp {
    /// Hardware address of the interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,

    /// Hostname handed out with the lease
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// The leased address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<Ip>,
    /// Fields not modelled here, carried through replaces untouched
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// An IP address with its network parameters
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Ip {
    /// The address itself
    #[serde(default)]
    pub address: String,

    /// Subnet mask
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netmask: Option<String>,

    /// Default gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Fields not modelled here, carried through replaces untouched
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

impl Hardware {
    /// Every non-empty DHCP address, in interface order
    pub fn ip_addresses(&self) -> impl Iterator<Item = &str> {
        self.interfaces()
            .filter_map(|iface| iface.dhcp.as_ref()?.ip.as_ref())
            .map(|ip| ip.address.as_str())
            .filter(|address| !address.is_empty())
    }

    /// The first interface's MAC address, used to pick the provisioning worker
    pub fn first_mac(&self) -> Option<&str> {
        self.interfaces()
            .filter_map(|iface| iface.dhcp.as_ref()?.mac.as_deref())
            .find(|mac| !mac.is_empty())
    }

    /// Device path of the first disk
    pub fn first_disk(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .disks
            .iter()
            .map(|disk| disk.device.as_str())
            .find(|device| !device.is_empty())
    }

    /// Provider identifier handed to cluster-api for machines running on this hardware
    pub fn provider_id(&self) -> String {
        format!("tinkerbell://{}", self.spec.id)
    }

    /// Name and namespace of the machine claiming this hardware, read from its labels
    pub fn owner(&self) -> Option<(&str, &str)> {
        let labels = self.metadata.labels.as_ref()?;
        Some((
            labels.get(HARDWARE_OWNER_NAME_LABEL)?.as_str(),
            labels.get(HARDWARE_OWNER_NAMESPACE_LABEL)?.as_str(),
        ))
    }

    fn interfaces(&self) -> impl Iterator<Item = &Interface> {
        self.status.iter().flat_map(|status| status.interfaces.iter())
    }
}

/// TemplateSpec defines the desired state of a `Template`
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "tinkerbell.org",
    version = "v1alpha1",
    kind = "Template",
    namespaced,
    status = "TemplateStatus"
)]
pub struct TemplateSpec {
    /// The rendered Tinkerbell template document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// TemplateStatus defines the observed state of a `Template`
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[allow(missing_docs)]
pub struct TemplateStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// WorkflowSpec defines the desired state of a `Workflow`
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "tinkerbell.org",
    version = "v1alpha1",
    kind = "Workflow",
    namespaced,
    status = "WorkflowStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    /// Name of the `Template` to run
    #[serde(default)]
    pub template_ref: String,

    /// Name of the `Hardware` to run on
    #[serde(default)]
    pub hardware_ref: String,

    /// Values for the template's worker placeholders, e.g. `device_1` to a MAC address
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hardware_map: BTreeMap<String, String>,
}

/// WorkflowStatus defines the observed state of a `Workflow`
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
    /// Aggregate state of all tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<WorkflowState>,

    /// Overall timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_timeout: Option<i64>,
}

/// Lifecycle of a Tinkerbell workflow
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[allow(missing_docs)]
pub enum WorkflowState {
    #[serde(rename = "STATE_PENDING")]
    Pending,
    #[serde(rename = "STATE_RUNNING")]
    Running,
    #[serde(rename = "STATE_FAILED")]
    Failed,
    #[serde(rename = "STATE_TIMEOUT")]
    Timeout,
    #[serde(rename = "STATE_SUCCESS")]
    Success,
}

impl Workflow {
    /// Current state, if Tinkerbell reported one yet
    pub fn state(&self) -> Option<WorkflowState> {
        self.status.as_ref()?.state
    }
}
