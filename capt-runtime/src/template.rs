//! Provisioning artifacts: the Tinkerbell `Template` and `Workflow` for a machine
use std::collections::BTreeMap;

use capt_core::{
    tinkerbell::{TemplateSpec, WorkflowSpec},
    Hardware, Template, TinkerbellCluster, TinkerbellMachine, Workflow,
};
use kube::{api::ObjectMeta, Resource, ResourceExt};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::{
    error::{Error, Result, StoreResultExt},
    store::{Object, Store},
};

/// Image URL format used when neither the machine nor the cluster configure one
pub const DEFAULT_IMAGE_LOOKUP_FORMAT: &str =
    "{{.BaseRegistry}}/{{.OSDistro}}-{{.OSVersion}}:{{.KubernetesVersion}}.gz";

/// Registry used when neither the machine nor the cluster configure one
pub const DEFAULT_IMAGE_LOOKUP_BASE_REGISTRY: &str = "ghcr.io/tinkerbell/cluster-api-provider-tinkerbell";

/// OS distribution used when neither the machine nor the cluster configure one
pub const DEFAULT_IMAGE_LOOKUP_OS_DISTRO: &str = "ubuntu";

/// Key of the workflow hardware map naming the worker that runs the template
const WORKER_DEVICE: &str = "device_1";

fn default_os_version(distro: &str) -> &'static str {
    match distro {
        "ubuntu" => "20.04",
        _ => "",
    }
}

/// Inputs to the OS image URL of a machine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageLookup {
    /// URL format with `{{.Placeholder}}` substitutions
    pub format: String,
    /// Registry substituted for `{{.BaseRegistry}}`
    pub base_registry: String,
    /// Distribution substituted for `{{.OSDistro}}`
    pub os_distro: String,
    /// Distribution version substituted for `{{.OSVersion}}`
    pub os_version: String,
    /// Kubernetes version substituted for `{{.KubernetesVersion}}`, always `v` prefixed
    pub kubernetes_version: String,
}

impl ImageLookup {
    /// Machine settings win over cluster settings, which win over the defaults
    pub fn resolve(machine: &TinkerbellMachine, cluster: &TinkerbellCluster, kubernetes_version: &str) -> Self {
        fn pick(machine: &str, cluster: &str, default: &str) -> String {
            [machine, cluster, default]
                .into_iter()
                .find(|value| !value.is_empty())
                .unwrap_or_default()
                .to_string()
        }
        let (m, c) = (&machine.spec, &cluster.spec);
        let os_distro = pick(
            &m.image_lookup_os_distro,
            &c.image_lookup_os_distro,
            DEFAULT_IMAGE_LOOKUP_OS_DISTRO,
        );
        let os_version = pick(
            &m.image_lookup_os_version,
            &c.image_lookup_os_version,
            default_os_version(&os_distro),
        );
        let kubernetes_version = if kubernetes_version.starts_with('v') {
            kubernetes_version.to_string()
        } else {
            format!("v{kubernetes_version}")
        };
        Self {
            format: pick(
                &m.image_lookup_format,
                &c.image_lookup_format,
                DEFAULT_IMAGE_LOOKUP_FORMAT,
            ),
            base_registry: pick(
                &m.image_lookup_base_registry,
                &c.image_lookup_base_registry,
                DEFAULT_IMAGE_LOOKUP_BASE_REGISTRY,
            ),
            os_distro,
            os_version,
            kubernetes_version,
        }
    }

    /// The format with every known placeholder substituted
    pub fn image_url(&self) -> String {
        self.format
            .replace("{{.BaseRegistry}}", &self.base_registry)
            .replace("{{.OSDistro}}", &self.os_distro)
            .replace("{{.OSVersion}}", &self.os_version)
            .replace("{{.KubernetesVersion}}", &self.kubernetes_version)
    }
}

#[derive(Serialize)]
struct TemplateDocument {
    version: &'static str,
    name: String,
    global_timeout: u32,
    tasks: Vec<Task>,
}

#[derive(Serialize)]
struct Task {
    name: String,
    worker: String,
    volumes: Vec<&'static str>,
    actions: Vec<Action>,
}

#[derive(Serialize)]
struct Action {
    name: &'static str,
    image: &'static str,
    timeout: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<&'static str>,
    environment: BTreeMap<&'static str, String>,
}

/// The first partition on `disk`, `/dev/sda` -> `/dev/sda1`, `/dev/nvme0n1` -> `/dev/nvme0n1p1`
fn first_partition(disk: &str) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{disk}p1")
    } else {
        format!("{disk}1")
    }
}

/// Render the built in provisioning template
///
/// It streams the OS image onto the first disk, drops the bootstrap payload where cloud-init
/// picks it up and kexecs into the installed system.
pub fn render_default_template(name: &str, disk: &str, image_url: &str, user_data: &str) -> Result<String> {
    let partition = first_partition(disk);
    let write_file = |path: &str, contents: &str, mode: &str| {
        BTreeMap::from([
            ("DEST_DISK", partition.clone()),
            ("FS_TYPE", "ext4".to_string()),
            ("DEST_PATH", path.to_string()),
            ("CONTENTS", contents.to_string()),
            ("UID", "0".to_string()),
            ("GID", "0".to_string()),
            ("MODE", mode.to_string()),
            ("DIRMODE", "0700".to_string()),
        ])
    };
    let document = TemplateDocument {
        version: "0.1",
        name: name.to_string(),
        global_timeout: 6000,
        tasks: vec![Task {
            name: name.to_string(),
            worker: format!("{{{{.{WORKER_DEVICE}}}}}"),
            volumes: vec![
                "/dev:/dev",
                "/dev/console:/dev/console",
                "/lib/firmware:/lib/firmware:ro",
            ],
            actions: vec![
                Action {
                    name: "stream-image",
                    image: "quay.io/tinkerbell-actions/image2disk:v1.0.0",
                    timeout: 600,
                    pid: None,
                    environment: BTreeMap::from([
                        ("DEST_DISK", disk.to_string()),
                        ("IMG_URL", image_url.to_string()),
                        ("COMPRESSED", "true".to_string()),
                    ]),
                },
                Action {
                    name: "write-cloud-init-config",
                    image: "quay.io/tinkerbell-actions/writefile:v1.0.0",
                    timeout: 90,
                    pid: None,
                    environment: write_file(
                        "/etc/cloud/cloud.cfg.d/10_tinkerbell.cfg",
                        "datasource_list: [NoCloud]\n",
                        "0600",
                    ),
                },
                Action {
                    name: "write-user-data",
                    image: "quay.io/tinkerbell-actions/writefile:v1.0.0",
                    timeout: 90,
                    pid: None,
                    environment: write_file("/var/lib/cloud/seed/nocloud/user-data", user_data, "0600"),
                },
                Action {
                    name: "kexec",
                    image: "quay.io/tinkerbell-actions/kexec:v1.0.0",
                    timeout: 90,
                    pid: Some("host"),
                    environment: BTreeMap::from([
                        ("BLOCK_DEVICE", partition.clone()),
                        ("FS_TYPE", "ext4".to_string()),
                    ]),
                },
            ],
        }],
    };
    serde_yaml::to_string(&document).map_err(Error::Render)
}

/// The artifacts backing one machine's provisioning
#[derive(Clone, Debug)]
pub struct Artifacts {
    /// What to run
    pub template: Template,
    /// Running it on the claimed hardware
    pub workflow: Workflow,
}

/// Creates the `Template` and `Workflow` of a machine, at most once
pub struct ArtifactBuilder<'a, S> {
    store: &'a S,
}

impl<'a, S: Store> ArtifactBuilder<'a, S> {
    /// A builder working against `store`
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Make sure both artifacts exist, creating whichever is missing
    ///
    /// Existing artifacts are returned as they are, even if the inputs changed since.
    #[instrument(skip_all, fields(machine = %machine.name_any(), hardware = %hardware.name_any()))]
    pub async fn ensure(
        &self,
        machine: &TinkerbellMachine,
        hardware: &Hardware,
        image: &ImageLookup,
        user_data: &str,
    ) -> Result<Artifacts> {
        let namespace = machine.namespace().ok_or(Error::MissingNamespace)?;
        let name = machine.name_any();

        let template = self
            .get_or_create(&namespace, &name, || {
                let data = match machine.template_override() {
                    Some(data) => data.to_string(),
                    None => {
                        let disk = hardware
                            .first_disk()
                            .ok_or_else(|| Error::HardwareMissingDisk(hardware.name_any()))?;
                        render_default_template(&name, disk, &image.image_url(), user_data)?
                    }
                };
                let owner = hardware.owner_ref(&()).ok_or(Error::MissingObjectKey(".metadata.uid"))?;
                Ok(Template {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        namespace: Some(namespace.clone()),
                        owner_references: Some(vec![owner]),
                        ..ObjectMeta::default()
                    },
                    spec: TemplateSpec { data: Some(data) },
                    status: None,
                })
            })
            .await?;

        let workflow = self
            .get_or_create(&namespace, &name, || {
                let owner = machine
                    .controller_owner_ref(&())
                    .ok_or(Error::MissingObjectKey(".metadata.uid"))?;
                let hardware_map = hardware
                    .first_mac()
                    .map(|mac| BTreeMap::from([(WORKER_DEVICE.to_string(), mac.to_string())]))
                    .unwrap_or_default();
                Ok(Workflow {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        namespace: Some(namespace.clone()),
                        owner_references: Some(vec![owner]),
                        ..ObjectMeta::default()
                    },
                    spec: WorkflowSpec {
                        template_ref: template.name_any(),
                        hardware_ref: hardware.name_any(),
                        hardware_map,
                    },
                    status: None,
                })
            })
            .await?;

        Ok(Artifacts { template, workflow })
    }

    async fn get_or_create<K: Object>(
        &self,
        namespace: &str,
        name: &str,
        build: impl FnOnce() -> Result<K>,
    ) -> Result<K> {
        let kind = K::kind(&());
        if let Some(existing) = self.store.get_opt(namespace, name).await.context("getting artifact")? {
            debug!(%kind, "artifact exists");
            return Ok(existing);
        }
        match self.store.create(&build()?).await {
            Ok(created) => {
                info!(%kind, "created artifact");
                Ok(created)
            }
            // lost a race against another reconcile of the same machine
            Err(err) if err.is_already_exists() => self
                .store
                .get(namespace, name)
                .await
                .context("getting artifact"),
            Err(err) => Err(err).context("creating artifact"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capt_core::infrastructure::{TinkerbellClusterSpec, TinkerbellMachineSpec};

    fn lookup(machine: TinkerbellMachineSpec, cluster: TinkerbellClusterSpec, version: &str) -> ImageLookup {
        ImageLookup::resolve(
            &TinkerbellMachine::new("m", machine),
            &TinkerbellCluster::new("c", cluster),
            version,
        )
    }

    #[test]
    fn image_lookup_defaults() {
        let image = lookup(Default::default(), Default::default(), "1.19.4");
        assert_eq!(
            image.image_url(),
            "ghcr.io/tinkerbell/cluster-api-provider-tinkerbell/ubuntu-20.04:v1.19.4.gz"
        );
    }

    #[test]
    fn machine_settings_beat_cluster_settings() {
        let image = lookup(
            TinkerbellMachineSpec {
                image_lookup_os_version: "22.04".into(),
                ..Default::default()
            },
            TinkerbellClusterSpec {
                image_lookup_base_registry: "registry.local/images".into(),
                image_lookup_os_version: "18.04".into(),
                image_lookup_format: "{{.BaseRegistry}}/{{.OSDistro}}/{{.OSVersion}}/{{.KubernetesVersion}}.raw"
                    .into(),
                ..Default::default()
            },
            "v1.23.5",
        );
        assert_eq!(image.image_url(), "registry.local/images/ubuntu/22.04/v1.23.5.raw");
    }

    #[test]
    fn unknown_distros_have_no_default_version() {
        let image = lookup(
            TinkerbellMachineSpec {
                image_lookup_os_distro: "flatcar".into(),
                ..Default::default()
            },
            Default::default(),
            "1.20.0",
        );
        assert_eq!(image.os_version, "");
    }

    #[test]
    fn partitions() {
        assert_eq!(first_partition("/dev/sda"), "/dev/sda1");
        assert_eq!(first_partition("/dev/nvme0n1"), "/dev/nvme0n1p1");
    }

    #[test]
    fn default_template_streams_image_and_writes_user_data() {
        let rendered =
            render_default_template("m-0", "/dev/sda", "http://images/ubuntu.gz", "#cloud-config\n").unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(doc["name"].as_str(), Some("m-0"));
        let task = &doc["tasks"][0];
        assert_eq!(task["worker"].as_str(), Some("{{.device_1}}"));

        let actions = task["actions"].as_sequence().unwrap();
        let names: Vec<_> = actions.iter().map(|a| a["name"].as_str().unwrap()).collect();
        assert_eq!(names, ["stream-image", "write-cloud-init-config", "write-user-data", "kexec"]);
        assert_eq!(actions[0]["environment"]["IMG_URL"].as_str(), Some("http://images/ubuntu.gz"));
        assert_eq!(actions[0]["environment"]["DEST_DISK"].as_str(), Some("/dev/sda"));
        assert_eq!(actions[2]["environment"]["CONTENTS"].as_str(), Some("#cloud-config\n"));
        assert_eq!(actions[3]["environment"]["BLOCK_DEVICE"].as_str(), Some("/dev/sda1"));
        assert_eq!(actions[3]["pid"].as_str(), Some("host"));
    }
}
