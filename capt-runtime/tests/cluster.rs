mod common;

use capt_core::{
    labels::{CLUSTER_FINALIZER, PAUSED_ANNOTATION},
    ApiEndpoint, Cluster, MetaExt, TinkerbellCluster,
};
use capt_runtime::{cluster::reconcile_cluster, Error, MemoryStore, Store};
use common::*;
use kube::{runtime::controller::Action, ResourceExt};

fn endpoint(host: &str, port: i32) -> ApiEndpoint {
    ApiEndpoint {
        host: host.into(),
        port,
    }
}

async fn world(cluster_endpoint: ApiEndpoint, infra_endpoint: ApiEndpoint) -> MemoryStore {
    let store = MemoryStore::new();
    store.create(&cluster(CLUSTER, cluster_endpoint)).await.unwrap();
    store
        .create(&tinkerbell_cluster(CLUSTER, infra_endpoint, false))
        .await
        .unwrap();
    store
}

async fn reconcile(store: &MemoryStore) -> Result<Action, Error> {
    reconcile_cluster(&context(store.clone()), NAMESPACE, CLUSTER).await
}

#[tokio::test]
async fn cluster_endpoint_is_copied_to_infrastructure() {
    init_tracing();
    let store = world(endpoint("10.0.0.1", 6443), ApiEndpoint::default()).await;

    let action = reconcile(&store).await.unwrap();
    assert_eq!(action, Action::await_change());

    let tc: TinkerbellCluster = get(&store, CLUSTER).await;
    assert_eq!(tc.spec.control_plane_endpoint, endpoint("10.0.0.1", 6443));
    assert!(tc.is_ready());
    assert!(tc.has_finalizer(CLUSTER_FINALIZER));
}

#[tokio::test]
async fn infrastructure_endpoint_is_copied_to_cluster_with_default_port() {
    let store = world(ApiEndpoint::default(), endpoint("10.0.0.2", 0)).await;

    reconcile(&store).await.unwrap();

    let cluster: Cluster = get(&store, CLUSTER).await;
    assert_eq!(cluster.spec.control_plane_endpoint, endpoint("10.0.0.2", 6443));
    let tc: TinkerbellCluster = get(&store, CLUSTER).await;
    assert_eq!(tc.spec.control_plane_endpoint, endpoint("10.0.0.2", 6443));
    assert!(tc.is_ready());
}

#[tokio::test]
async fn unknown_cluster_fields_survive_the_endpoint_update() {
    let store = MemoryStore::new();
    let mut owner = cluster(CLUSTER, ApiEndpoint::default());
    owner
        .spec
        .other
        .insert("clusterNetwork".into(), serde_json::json!({"pods": {"cidrBlocks": ["192.168.0.0/16"]}}));
    store.create(&owner).await.unwrap();
    store
        .create(&tinkerbell_cluster(CLUSTER, endpoint("10.0.0.2", 6443), false))
        .await
        .unwrap();

    reconcile(&store).await.unwrap();

    let cluster: Cluster = get(&store, CLUSTER).await;
    assert_eq!(cluster.spec.control_plane_endpoint, endpoint("10.0.0.2", 6443));
    assert!(cluster.spec.other.contains_key("clusterNetwork"));
}

#[tokio::test]
async fn missing_endpoint_is_an_error() {
    let store = world(ApiEndpoint::default(), ApiEndpoint::default()).await;

    let err = reconcile(&store).await.unwrap_err();
    assert!(matches!(err, Error::ControlPlaneEndpointNotSet), "{err}");
    let tc: TinkerbellCluster = get(&store, CLUSTER).await;
    assert!(!tc.is_ready());
}

#[tokio::test]
async fn settled_cluster_is_left_alone() {
    let store = world(endpoint("10.0.0.1", 6443), ApiEndpoint::default()).await;
    reconcile(&store).await.unwrap();
    let first: TinkerbellCluster = get(&store, CLUSTER).await;

    reconcile(&store).await.unwrap();
    let second: TinkerbellCluster = get(&store, CLUSTER).await;
    assert_eq!(first.metadata.resource_version, second.metadata.resource_version);
}

#[tokio::test]
async fn paused_objects_are_skipped() {
    // paused on the infrastructure side
    let store = world(endpoint("10.0.0.1", 6443), ApiEndpoint::default()).await;
    let mut tc: TinkerbellCluster = get(&store, CLUSTER).await;
    tc.annotations_mut().insert(PAUSED_ANNOTATION.into(), String::new());
    store.replace(&tc).await.unwrap();

    assert_eq!(reconcile(&store).await.unwrap(), Action::await_change());
    let tc: TinkerbellCluster = get(&store, CLUSTER).await;
    assert!(!tc.is_ready());
    assert_eq!(tc.spec.control_plane_endpoint, ApiEndpoint::default());

    // paused through the owning cluster
    let store = world(endpoint("10.0.0.1", 6443), ApiEndpoint::default()).await;
    let mut owner: Cluster = get(&store, CLUSTER).await;
    owner.spec.paused = true;
    store.replace(&owner).await.unwrap();

    assert_eq!(reconcile(&store).await.unwrap(), Action::await_change());
    let tc: TinkerbellCluster = get(&store, CLUSTER).await;
    assert!(!tc.is_ready());
}

#[tokio::test]
async fn waits_for_an_owner_reference() {
    let store = MemoryStore::new();
    let mut tc = tinkerbell_cluster(CLUSTER, endpoint("10.0.0.1", 6443), false);
    tc.metadata.owner_references = None;
    store.create(&tc).await.unwrap();

    assert_eq!(reconcile(&store).await.unwrap(), Action::await_change());
    let tc: TinkerbellCluster = get(&store, CLUSTER).await;
    assert!(!tc.is_ready());
    assert!(!tc.has_finalizer(CLUSTER_FINALIZER));
}

#[tokio::test]
async fn waits_for_the_owning_cluster() {
    let store = MemoryStore::new();
    store
        .create(&tinkerbell_cluster(CLUSTER, endpoint("10.0.0.1", 6443), false))
        .await
        .unwrap();

    assert_eq!(reconcile(&store).await.unwrap(), Action::await_change());
    let tc: TinkerbellCluster = get(&store, CLUSTER).await;
    assert!(!tc.is_ready());
}

#[tokio::test]
async fn missing_cluster_is_ignored() {
    let store = MemoryStore::new();
    assert_eq!(reconcile(&store).await.unwrap(), Action::await_change());
}

#[tokio::test]
async fn deletion_removes_the_finalizer() {
    let store = world(endpoint("10.0.0.1", 6443), ApiEndpoint::default()).await;
    reconcile(&store).await.unwrap();

    store
        .delete::<TinkerbellCluster>(NAMESPACE, CLUSTER)
        .await
        .unwrap();
    let tc: TinkerbellCluster = get(&store, CLUSTER).await;
    assert!(tc.is_deleting());

    reconcile(&store).await.unwrap();
    let remaining: Vec<TinkerbellCluster> = all(&store).await;
    assert!(remaining.is_empty());
    // the owning cluster is not touched
    let owner: Cluster = get(&store, CLUSTER).await;
    assert_eq!(owner.spec.control_plane_endpoint, endpoint("10.0.0.1", 6443));
}
