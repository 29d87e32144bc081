//! Reconciliation of `TinkerbellCluster`s
use std::sync::Arc;

use capt_core::{
    infrastructure::TinkerbellClusterStatus, labels::CLUSTER_FINALIZER, ApiEndpoint, Cluster, MetaExt,
    TinkerbellCluster,
};
use kube::{runtime::controller::Action, Resource, ResourceExt};
use tracing::{debug, info, instrument};

use crate::{
    controller::Context,
    error::{Error, Result, StoreResultExt},
    store::Store,
};

/// Port of the Kubernetes API server when an endpoint does not name one
pub const KUBERNETES_API_PORT: i32 = 6443;

/// Entry point for the controller runtime
pub async fn reconcile<S: Store>(cluster: Arc<TinkerbellCluster>, ctx: Arc<Context<S>>) -> Result<Action> {
    let namespace = cluster.namespace().ok_or(Error::MissingNamespace)?;
    reconcile_cluster(&ctx, &namespace, &cluster.name_any()).await
}

/// Settle the control plane endpoint between a `Cluster` and its `TinkerbellCluster`
///
/// Whichever side has an endpoint provides it for the other, with the `Cluster` winning when
/// both do. Once settled the `TinkerbellCluster` is marked ready.
#[instrument(skip(ctx))]
pub async fn reconcile_cluster<S: Store>(ctx: &Context<S>, namespace: &str, name: &str) -> Result<Action> {
    let store = ctx.store()?;
    let Some(mut tc) = store
        .get_opt::<TinkerbellCluster>(namespace, name)
        .await
        .context("getting TinkerbellCluster object")?
    else {
        debug!("TinkerbellCluster is gone");
        return Ok(Action::await_change());
    };

    if tc.is_paused() {
        debug!("TinkerbellCluster is paused");
        return Ok(Action::await_change());
    }

    if tc.is_deleting() {
        if tc.remove_finalizer(CLUSTER_FINALIZER) {
            store.replace(&tc).await.context("removing finalizer")?;
            info!("removed finalizer");
        }
        return Ok(Action::await_change());
    }

    let Some(owner) = tc.owner_of_kind(&Cluster::group(&()), &Cluster::kind(&())) else {
        debug!("waiting for the Cluster controller to set an owner reference");
        return Ok(Action::await_change());
    };
    let Some(mut cluster) = store
        .get_opt::<Cluster>(namespace, &owner.name)
        .await
        .context("getting Cluster object")?
    else {
        debug!(cluster = %owner.name, "waiting for the owning Cluster to appear");
        return Ok(Action::await_change());
    };
    if cluster.is_paused() {
        debug!(cluster = %cluster.name_any(), "Cluster is paused");
        return Ok(Action::await_change());
    }

    let endpoint = settle_endpoint(&mut cluster.spec.control_plane_endpoint, &mut tc.spec.control_plane_endpoint)?;
    if cluster.spec.control_plane_endpoint != endpoint.original_cluster {
        store.replace(&cluster).await.context("updating Cluster endpoint")?;
        info!(endpoint = %cluster.spec.control_plane_endpoint, "set control plane endpoint on Cluster");
    }

    let finalizer_added = tc.add_finalizer(CLUSTER_FINALIZER);
    if finalizer_added || tc.spec.control_plane_endpoint != endpoint.original_infra {
        tc = store.replace(&tc).await.context("updating TinkerbellCluster")?;
    }

    if !tc.is_ready() {
        tc.status = Some(TinkerbellClusterStatus { ready: true });
        store.replace_status(&tc).await.context("updating TinkerbellCluster status")?;
        info!(endpoint = %tc.spec.control_plane_endpoint, "TinkerbellCluster is ready");
    }
    Ok(Action::await_change())
}

/// Endpoints as they were before settling
struct Settled {
    original_cluster: ApiEndpoint,
    original_infra: ApiEndpoint,
}

/// Make both endpoints agree, defaulting a missing port
fn settle_endpoint(cluster: &mut ApiEndpoint, infra: &mut ApiEndpoint) -> Result<Settled> {
    let settled = Settled {
        original_cluster: cluster.clone(),
        original_infra: infra.clone(),
    };
    let endpoint = if cluster.is_set() {
        cluster.clone()
    } else if infra.is_set() {
        infra.clone()
    } else {
        return Err(Error::ControlPlaneEndpointNotSet);
    }
    .with_default_port(KUBERNETES_API_PORT);

    *cluster = endpoint.clone();
    *infra = endpoint;
    Ok(settled)
}
