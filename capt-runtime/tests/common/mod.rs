#![allow(dead_code)]
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use capt_core::{
    cluster::{Bootstrap, ClusterSpec, MachineSpec},
    infrastructure::{TinkerbellClusterSpec, TinkerbellClusterStatus, TinkerbellMachineSpec},
    labels::{Selector, CLUSTER_NAME_LABEL},
    tinkerbell::{Dhcp, Disk, HardwareSpec, HardwareStatus, Interface, Ip},
    ApiEndpoint, Cluster, Hardware, Machine, ObjectReference, TinkerbellCluster, TinkerbellMachine,
};
use capt_runtime::{
    store::{self, Object},
    Config, Context, MemoryStore, Store,
};
use k8s_openapi::{api::core::v1::Secret, apimachinery::pkg::apis::meta::v1::OwnerReference, ByteString};
use kube::{api::ObjectMeta, Resource};

pub const NAMESPACE: &str = "default";
pub const CLUSTER: &str = "cluster-0";
pub const MACHINE: &str = "machine-0";
pub const HARDWARE_IP: &str = "1.1.1.1";
pub const HARDWARE_MAC: &str = "3c:ec:ef:4c:4f:54";
pub const KUBERNETES_VERSION: &str = "1.19.4";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn context<S: Store>(store: S) -> Context<S> {
    Context::new(store, Config::default())
}

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        ..ObjectMeta::default()
    }
}

fn owner_ref<K: Resource<DynamicType = ()>>(name: &str) -> OwnerReference {
    OwnerReference {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
        name: name.to_string(),
        uid: format!("{name}-uid"),
        controller: Some(true),
        ..OwnerReference::default()
    }
}

pub fn cluster(name: &str, endpoint: ApiEndpoint) -> Cluster {
    Cluster {
        metadata: meta(name),
        spec: ClusterSpec {
            control_plane_endpoint: endpoint,
            infrastructure_ref: Some(ObjectReference {
                api_version: Some("infrastructure.cluster.x-k8s.io/v1beta1".into()),
                kind: Some("TinkerbellCluster".into()),
                name: name.to_string(),
                namespace: Some(NAMESPACE.into()),
            }),
            ..ClusterSpec::default()
        },
        status: None,
    }
}

pub fn tinkerbell_cluster(name: &str, endpoint: ApiEndpoint, ready: bool) -> TinkerbellCluster {
    let mut metadata = meta(name);
    metadata.owner_references = Some(vec![owner_ref::<Cluster>(name)]);
    metadata.labels = Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), name.to_string())]));
    TinkerbellCluster {
        metadata,
        spec: TinkerbellClusterSpec {
            control_plane_endpoint: endpoint,
            ..TinkerbellClusterSpec::default()
        },
        status: ready.then_some(TinkerbellClusterStatus { ready }),
    }
}

pub fn machine(name: &str, cluster: &str, version: Option<&str>, secret: Option<&str>) -> Machine {
    let mut metadata = meta(name);
    metadata.labels = Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster.to_string())]));
    Machine {
        metadata,
        spec: MachineSpec {
            cluster_name: cluster.to_string(),
            bootstrap: Bootstrap {
                data_secret_name: secret.map(str::to_string),
            },
            version: version.map(str::to_string),
            infrastructure_ref: Some(ObjectReference {
                kind: Some("TinkerbellMachine".into()),
                name: name.to_string(),
                ..ObjectReference::default()
            }),
            ..MachineSpec::default()
        },
    }
}

pub fn tinkerbell_machine(name: &str, owner: Option<&str>) -> TinkerbellMachine {
    let mut metadata = meta(name);
    metadata.labels = Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), CLUSTER.to_string())]));
    metadata.owner_references = owner.map(|owner| vec![owner_ref::<Machine>(owner)]);
    TinkerbellMachine {
        metadata,
        spec: TinkerbellMachineSpec::default(),
        status: None,
    }
}

pub fn hardware(name: &str, ip: Option<&str>) -> Hardware {
    Hardware {
        metadata: meta(name),
        spec: HardwareSpec {
            id: uuid::Uuid::new_v4().to_string(),
            ..HardwareSpec::default()
        },
        status: Some(HardwareStatus {
            disks: vec![Disk {
                device: "/dev/sda".into(),
                ..Disk::default()
            }],
            interfaces: vec![Interface {
                dhcp: Some(Dhcp {
                    mac: Some(HARDWARE_MAC.into()),
                    ip: ip.map(|address| Ip {
                        address: address.into(),
                        ..Ip::default()
                    }),
                    ..Dhcp::default()
                }),
                ..Interface::default()
            }],
            ..HardwareStatus::default()
        }),
    }
}

pub fn secret(name: &str, value: Option<&[u8]>) -> Secret {
    Secret {
        metadata: meta(name),
        data: value.map(|value| BTreeMap::from([("value".to_string(), ByteString(value.to_vec()))])),
        ..Secret::default()
    }
}

/// A store holding one ready cluster, and a machine waiting for hardware with its bootstrap data
pub async fn provisioning_world() -> MemoryStore {
    let store = MemoryStore::new();
    let endpoint = ApiEndpoint {
        host: "10.0.0.1".into(),
        port: 6443,
    };
    store.create(&cluster(CLUSTER, endpoint.clone())).await.unwrap();
    store
        .create(&tinkerbell_cluster(CLUSTER, endpoint, true))
        .await
        .unwrap();
    add_machine(&store, MACHINE).await;
    store
}

/// Add a `Machine`, its `TinkerbellMachine` and its bootstrap secret
pub async fn add_machine(store: &MemoryStore, name: &str) {
    store
        .create(&machine(name, CLUSTER, Some(KUBERNETES_VERSION), Some(name)))
        .await
        .unwrap();
    store.create(&tinkerbell_machine(name, Some(name))).await.unwrap();
    store
        .create(&secret(name, Some(b"not nil bootstrap data")))
        .await
        .unwrap();
}

pub async fn get<K: Object>(store: &impl Store, name: &str) -> K {
    store.get(NAMESPACE, name).await.unwrap()
}

pub async fn all<K: Object>(store: &impl Store) -> Vec<K> {
    store.list(Some(NAMESPACE), &Selector::default()).await.unwrap()
}

/// Wraps a store to yield to the scheduler before every call and to fail hardware claims on demand
///
/// Yielding lets concurrent reconciliations interleave between reading and writing, the way
/// they do against a real API server.
#[derive(Clone, Default)]
pub struct RacyStore {
    pub inner: MemoryStore,
    conflicts: Arc<AtomicUsize>,
}

impl RacyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            conflicts: Arc::default(),
        }
    }

    /// Fail the next `n` hardware replaces with a conflict
    pub fn fail_claims(&self, n: usize) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    fn take_conflict(&self) -> bool {
        self.conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Store for RacyStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> store::Result<K> {
        tokio::task::yield_now().await;
        self.inner.get(namespace, name).await
    }

    async fn list<K: Object>(&self, namespace: Option<&str>, selector: &Selector) -> store::Result<Vec<K>> {
        tokio::task::yield_now().await;
        self.inner.list(namespace, selector).await
    }

    async fn create<K: Object>(&self, obj: &K) -> store::Result<K> {
        tokio::task::yield_now().await;
        self.inner.create(obj).await
    }

    async fn replace<K: Object>(&self, obj: &K) -> store::Result<K> {
        tokio::task::yield_now().await;
        if K::kind(&()) == "Hardware" && self.take_conflict() {
            return Err(store::Error::Conflict {
                kind: "Hardware".into(),
                namespace: obj.meta().namespace.clone().unwrap_or_default(),
                name: obj.meta().name.clone().unwrap_or_default(),
            });
        }
        self.inner.replace(obj).await
    }

    async fn replace_status<K: Object>(&self, obj: &K) -> store::Result<K> {
        tokio::task::yield_now().await;
        self.inner.replace_status(obj).await
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> store::Result<()> {
        tokio::task::yield_now().await;
        self.inner.delete::<K>(namespace, name).await
    }
}
