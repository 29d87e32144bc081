//! Wiring the reconcilers into watch driven controllers
use std::{sync::Arc, time::Duration};

use capt_core::{
    labels::CLUSTER_NAME_LABEL, Cluster, Hardware, Machine, TinkerbellCluster, TinkerbellMachine, Workflow,
};
use futures::StreamExt;
use kube::{
    runtime::{
        controller::{self, Action, Controller},
        reflector::{ObjectRef, Store as Cache},
        watcher,
    },
    Api, Client, Resource, ResourceExt,
};
use tracing::{debug, info, warn};

use crate::{
    cluster,
    error::{Error, Result},
    machine,
    store::{KubeStore, Object, Store},
};

/// Settings shared by both controllers
#[derive(Clone, Debug)]
pub struct Config {
    /// Only watch this namespace, or every namespace when unset
    pub namespace: Option<String>,
    /// Delay before retrying a failed reconciliation
    pub requeue: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: None,
            requeue: Duration::from_secs(10),
        }
    }
}

/// State handed to every reconciliation
pub struct Context<S> {
    store: Option<S>,
    /// Controller settings
    pub config: Config,
}

impl<S: Store> Context<S> {
    /// A context reconciling against `store`
    pub fn new(store: S, config: Config) -> Self {
        Self {
            store: Some(store),
            config,
        }
    }

    /// A context without a store, every reconciliation fails with [`Error::MissingClient`]
    pub fn unconfigured(config: Config) -> Self {
        Self { store: None, config }
    }

    pub(crate) fn store(&self) -> Result<&S> {
        self.store.as_ref().ok_or(Error::MissingClient)
    }
}

/// Log the failure and retry after the configured delay
pub fn error_policy<K, S>(obj: Arc<K>, error: &Error, ctx: Arc<Context<S>>) -> Action
where
    K: Resource,
{
    warn!(
        name = %obj.name_any(),
        namespace = ?obj.namespace(),
        reason = error.metric_label(),
        transient = error.is_transient(),
        "reconcile failed: {error}"
    );
    Action::requeue(ctx.config.requeue)
}

fn api<K: Object>(client: &Client, namespace: Option<&str>) -> Api<K> {
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

/// Machines to look at again when a `Hardware` changes: its owner, if any
fn hardware_owner(hardware: Hardware) -> Option<ObjectRef<TinkerbellMachine>> {
    let (name, namespace) = hardware.owner()?;
    Some(ObjectRef::new(name).within(namespace))
}

/// Machines to look at again when a `Machine` changes: its infrastructure machine
fn machine_infrastructure(machine: Machine) -> Option<ObjectRef<TinkerbellMachine>> {
    let infra = machine.spec.infrastructure_ref.as_ref()?;
    if infra.kind.as_deref() != Some(TinkerbellMachine::kind(&()).as_ref()) {
        return None;
    }
    let namespace = infra.namespace.clone().or_else(|| machine.namespace())?;
    Some(ObjectRef::new(&infra.name).within(&namespace))
}

/// Machines to look at again when a `TinkerbellCluster` changes: every machine of the cluster
fn cluster_machines(
    machines: &Cache<TinkerbellMachine>,
    cluster: &TinkerbellCluster,
) -> Vec<ObjectRef<TinkerbellMachine>> {
    let Some(cluster_name) = cluster.labels().get(CLUSTER_NAME_LABEL) else {
        return Vec::new();
    };
    machines
        .state()
        .into_iter()
        .filter(|tm| {
            tm.namespace() == cluster.namespace() && tm.labels().get(CLUSTER_NAME_LABEL) == Some(cluster_name)
        })
        .map(|tm| ObjectRef::from_obj(&*tm))
        .collect()
}

async fn run_machines<S: Store>(client: Client, ctx: Arc<Context<S>>) {
    let namespace = ctx.config.namespace.clone();
    let ns = namespace.as_deref();
    let controller = Controller::new(
        api::<TinkerbellMachine>(&client, ns),
        watcher::Config::default().any_semantic(),
    );
    let machines = controller.store();
    controller
        .owns(api::<Workflow>(&client, ns), watcher::Config::default())
        .watches(api::<Hardware>(&client, ns), watcher::Config::default(), hardware_owner)
        .watches(api::<Machine>(&client, ns), watcher::Config::default(), machine_infrastructure)
        .watches(
            api::<TinkerbellCluster>(&client, ns),
            watcher::Config::default(),
            move |cluster: TinkerbellCluster| cluster_machines(&machines, &cluster),
        )
        .shutdown_on_signal()
        .run(machine::reconcile::<S>, error_policy::<TinkerbellMachine, S>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(machine = %obj, "reconciled"),
                Err(controller::Error::ReconcilerFailed(..)) => {}
                Err(err) => warn!(error = %err, "machine controller error"),
            }
        })
        .await;
}

async fn run_clusters<S: Store>(client: Client, ctx: Arc<Context<S>>) {
    let namespace = ctx.config.namespace.clone();
    let ns = namespace.as_deref();
    Controller::new(
        api::<TinkerbellCluster>(&client, ns),
        watcher::Config::default().any_semantic(),
    )
    .watches(api::<Cluster>(&client, ns), watcher::Config::default(), |cluster: Cluster| {
        let infra = cluster.spec.infrastructure_ref.as_ref()?;
        if infra.kind.as_deref() != Some(TinkerbellCluster::kind(&()).as_ref()) {
            return None;
        }
        let namespace = infra.namespace.clone().or_else(|| cluster.namespace())?;
        Some(ObjectRef::<TinkerbellCluster>::new(&infra.name).within(&namespace))
    })
    .shutdown_on_signal()
    .run(cluster::reconcile::<S>, error_policy::<TinkerbellCluster, S>, ctx)
    .for_each(|res| async move {
        match res {
            Ok((obj, _)) => debug!(cluster = %obj, "reconciled"),
            Err(controller::Error::ReconcilerFailed(..)) => {}
            Err(err) => warn!(error = %err, "cluster controller error"),
        }
    })
    .await;
}

/// Run both controllers against the API server until a termination signal arrives
pub async fn run(client: Client, config: Config) {
    info!(namespace = ?config.namespace, requeue = ?config.requeue, "starting controllers");
    let ctx = Arc::new(Context::new(KubeStore::new(client.clone()), config));
    futures::join!(run_machines(client.clone(), ctx.clone()), run_clusters(client, ctx));
    info!("controllers stopped");
}
