//! Reconciliation of `TinkerbellMachine`s
use std::sync::Arc;

use capt_core::{
    infrastructure::TinkerbellMachineStatus,
    labels::MACHINE_FINALIZER,
    tinkerbell::WorkflowState,
    Cluster, Hardware, InstanceStatus, Machine, MachineAddress, MachineStatusError, MetaExt,
    TinkerbellCluster, TinkerbellMachine,
};
use k8s_openapi::api::core::v1::Secret;
use kube::{runtime::controller::Action, Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use crate::{
    allocator::Allocator,
    controller::Context,
    error::{Error, Result, StoreResultExt},
    store::Store,
    template::{ArtifactBuilder, Artifacts, ImageLookup},
};

/// Key of the bootstrap secret holding the user data
const BOOTSTRAP_DATA_KEY: &str = "value";

/// Entry point for the controller runtime
pub async fn reconcile<S: Store>(machine: Arc<TinkerbellMachine>, ctx: Arc<Context<S>>) -> Result<Action> {
    let namespace = machine.namespace().ok_or(Error::MissingNamespace)?;
    reconcile_machine(&ctx, &namespace, &machine.name_any()).await
}

/// Converge one `TinkerbellMachine` towards running on provisioned hardware
///
/// Returns an idle action both when the machine is done and when it has to wait for another
/// controller; those will trigger a new reconcile by changing a watched object.
#[instrument(skip(ctx))]
pub async fn reconcile_machine<S: Store>(ctx: &Context<S>, namespace: &str, name: &str) -> Result<Action> {
    let store = ctx.store()?;
    let Some(mut tm) = store
        .get_opt::<TinkerbellMachine>(namespace, name)
        .await
        .context("getting TinkerbellMachine")?
    else {
        debug!("TinkerbellMachine is gone");
        return Ok(Action::await_change());
    };

    let Some(owner) = tm.owner_of_kind(&Machine::group(&()), &Machine::kind(&())) else {
        debug!("waiting for the Machine controller to set an owner reference");
        return Ok(Action::await_change());
    };
    let Some(machine) = store
        .get_opt::<Machine>(namespace, &owner.name)
        .await
        .context("getting Machine")?
    else {
        debug!(machine = %owner.name, "waiting for the owning Machine to appear");
        return Ok(Action::await_change());
    };

    let version = machine.version().ok_or(Error::MachineVersionEmpty)?;
    let cluster_name = machine.cluster_name().ok_or(Error::MissingClusterName)?;
    let cluster: Cluster = store
        .get(namespace, cluster_name)
        .await
        .map_err(Error::ClusterLookup)?;
    let infra_ref = cluster
        .spec
        .infrastructure_ref
        .as_ref()
        .ok_or(Error::MissingInfrastructureRef)?;
    let tc: TinkerbellCluster = store
        .get(infra_ref.namespace.as_deref().unwrap_or(namespace), &infra_ref.name)
        .await
        .map_err(Error::InfraClusterLookup)?;
    if !tc.is_ready() {
        debug!(cluster = %tc.name_any(), "waiting for TinkerbellCluster to become ready");
        return Ok(Action::await_change());
    }

    let Some(secret_name) = machine.bootstrap_secret_name() else {
        debug!("waiting for bootstrap data");
        return Ok(Action::await_change());
    };
    let secret: Secret = store
        .get(namespace, secret_name)
        .await
        .map_err(Error::BootstrapSecretLookup)?;
    let user_data = bootstrap_user_data(&secret)?;

    let allocator = Allocator::new(store);
    if tm.is_deleting() {
        allocator.release(tm.hardware_name(), name, namespace).await?;
        if tm.remove_finalizer(MACHINE_FINALIZER) {
            store.replace(&tm).await.context("removing finalizer")?;
        }
        info!("released machine");
        return Ok(Action::await_change());
    }

    // must be in place before any hardware is claimed, so the claim is released on delete
    if tm.add_finalizer(MACHINE_FINALIZER) {
        tm = store.replace(&tm).await.context("adding finalizer")?;
    }

    let hardware = match tm.hardware_name() {
        Some(hardware_name) => store
            .get::<Hardware>(namespace, hardware_name)
            .await
            .context("getting claimed hardware")?,
        None => {
            let hardware = match allocator.allocate(name, namespace).await {
                Ok(hardware) => hardware,
                Err(err @ Error::HardwareFirstInterfaceDhcpMissingIp(_)) => {
                    record_failure(store, &tm, &err).await;
                    return Err(err);
                }
                Err(err) => return Err(err),
            };
            tm.spec.hardware_name = Some(hardware.name_any());
            tm.spec.provider_id = Some(hardware.provider_id());
            tm = store.replace(&tm).await.context("recording hardware claim")?;
            info!(hardware = %hardware.name_any(), provider_id = ?tm.spec.provider_id, "hardware assigned");
            hardware
        }
    };

    if tm.template_override().is_none() && hardware.first_disk().is_none() {
        let err = Error::HardwareMissingDisk(hardware.name_any());
        record_failure(store, &tm, &err).await;
        return Err(err);
    }

    let image = ImageLookup::resolve(&tm, &tc, version);
    let artifacts = ArtifactBuilder::new(store)
        .ensure(&tm, &hardware, &image, &user_data)
        .await?;

    update_status(store, tm, &artifacts).await?;
    Ok(Action::await_change())
}

/// The bootstrap payload stored under the secret's `value` key
fn bootstrap_user_data(secret: &Secret) -> Result<String> {
    let value = secret
        .data
        .as_ref()
        .and_then(|data| data.get(BOOTSTRAP_DATA_KEY))
        .ok_or(Error::MissingBootstrapDataSecretValueKey)?;
    if value.0.is_empty() {
        return Err(Error::BootstrapUserDataEmpty);
    }
    Ok(String::from_utf8_lossy(&value.0).into_owned())
}

fn instance_status(workflow: Option<WorkflowState>) -> InstanceStatus {
    match workflow {
        None | Some(WorkflowState::Pending) => InstanceStatus::Pending,
        Some(WorkflowState::Running) => InstanceStatus::Provisioning,
        Some(WorkflowState::Success) => InstanceStatus::Provisioned,
        Some(WorkflowState::Failed) => InstanceStatus::Failed,
        Some(WorkflowState::Timeout) => InstanceStatus::Timeout,
    }
}

/// Project the claimed hardware and the workflow onto the machine's status
async fn update_status<S: Store>(store: &S, mut tm: TinkerbellMachine, artifacts: &Artifacts) -> Result<()> {
    let namespace = tm.namespace().ok_or(Error::MissingNamespace)?;
    let hardware_name = tm
        .hardware_name()
        .ok_or(Error::MissingObjectKey(".spec.hardwareName"))?
        .to_string();
    let hardware: Hardware = store
        .get(&namespace, &hardware_name)
        .await
        .context("getting claimed hardware")?;

    let addresses: Vec<MachineAddress> = hardware.ip_addresses().map(MachineAddress::internal_ip).collect();
    let status = TinkerbellMachineStatus {
        ready: !addresses.is_empty(),
        addresses,
        instance_status: Some(instance_status(artifacts.workflow.state())),
        error_reason: None,
        error_message: None,
    };
    if tm.status.as_ref() == Some(&status) {
        return Ok(());
    }

    if status.ready && !tm.is_ready() {
        info!(hardware = %hardware_name, "machine is ready");
    }
    tm.status = Some(status);
    store.replace_status(&tm).await.context("updating status")?;
    Ok(())
}

/// Best effort: surface a terminal failure on the machine for cluster-api to pick up
async fn record_failure<S: Store>(store: &S, tm: &TinkerbellMachine, err: &Error) {
    let mut tm = tm.clone();
    let status = tm.status.get_or_insert_with(TinkerbellMachineStatus::default);
    status.error_reason = Some(MachineStatusError::InvalidConfiguration);
    status.error_message = Some(err.to_string());
    if let Err(update_err) = store.replace_status(&tm).await {
        warn!(error = %update_err, "failed to record machine failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret(data: Option<&[u8]>) -> Secret {
        Secret {
            data: data.map(|d| BTreeMap::from([("value".to_string(), ByteString(d.to_vec()))])),
            ..Secret::default()
        }
    }

    #[test]
    fn bootstrap_data_must_be_present_and_non_empty() {
        assert!(matches!(
            bootstrap_user_data(&secret(None)),
            Err(Error::MissingBootstrapDataSecretValueKey)
        ));
        assert!(matches!(
            bootstrap_user_data(&secret(Some(b""))),
            Err(Error::BootstrapUserDataEmpty)
        ));
        assert_eq!(
            bootstrap_user_data(&secret(Some(b"not nil bootstrap data"))).unwrap(),
            "not nil bootstrap data"
        );
    }

    #[test]
    fn workflow_states_map_onto_instance_status() {
        assert_eq!(instance_status(None), InstanceStatus::Pending);
        assert_eq!(
            instance_status(Some(WorkflowState::Running)),
            InstanceStatus::Provisioning
        );
        assert_eq!(
            instance_status(Some(WorkflowState::Success)),
            InstanceStatus::Provisioned
        );
        assert_eq!(instance_status(Some(WorkflowState::Timeout)), InstanceStatus::Timeout);
    }
}
