//! Claiming and releasing `Hardware` for machines
//!
//! Ownership is recorded only on the hardware itself, through the owner labels and the machine
//! finalizer, and every claim is a conditional replace. Two machines racing for the same unit
//! therefore cannot both win: the loser sees a conflict, lists again and picks another unit.
//! A claim that was committed but never recorded on the machine is found again through the
//! owner labels, so a crash between the two writes neither leaks nor duplicates hardware.
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use capt_core::{
    labels::{Selector, HARDWARE_OWNER_NAMESPACE_LABEL, HARDWARE_OWNER_NAME_LABEL, MACHINE_FINALIZER},
    Hardware, MetaExt,
};
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::{
    error::{Error, Result, StoreResultExt},
    store::Store,
};

/// Extra claim attempts after a lost race
const CLAIM_RETRIES: usize = 5;

/// Finds or claims exactly one `Hardware` per machine
pub struct Allocator<'a, S> {
    store: &'a S,
    min_delay: Duration,
    max_retries: usize,
}

impl<'a, S: Store> Allocator<'a, S> {
    /// An allocator working against `store`
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            min_delay: Duration::from_millis(100),
            max_retries: CLAIM_RETRIES,
        }
    }

    /// Override how long to wait before retrying a lost claim, and how often to retry
    #[must_use]
    pub fn with_retry(mut self, min_delay: Duration, max_retries: usize) -> Self {
        self.min_delay = min_delay;
        self.max_retries = max_retries;
        self
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_times(self.max_retries)
            .with_jitter()
    }

    /// Return the hardware owned by the machine, claiming a free unit if it owns none
    ///
    /// The returned hardware always has at least one DHCP address.
    #[instrument(skip(self))]
    pub async fn allocate(&self, machine_name: &str, namespace: &str) -> Result<Hardware> {
        let hardware = (|| self.claim(machine_name, namespace))
            .retry(self.backoff())
            .when(Error::is_conflict)
            .notify(|err: &Error, delay: Duration| {
                debug!(error = %err, ?delay, "lost hardware claim, retrying");
            })
            .await?;

        if hardware.ip_addresses().next().is_none() {
            return Err(Error::HardwareFirstInterfaceDhcpMissingIp(hardware.name_any()));
        }
        Ok(hardware)
    }

    /// The hardware carrying the machine's owner labels, if any
    pub async fn owned(&self, machine_name: &str, namespace: &str) -> Result<Option<Hardware>> {
        let mut owned: Vec<Hardware> = self
            .store
            .list(Some(namespace), &Selector::owned_by(machine_name, namespace))
            .await
            .context("listing owned hardware")?;
        if owned.len() > 1 {
            warn!(count = owned.len(), "machine owns more than one hardware unit");
        }
        owned.sort_by_key(ResourceExt::name_any);
        Ok(owned.into_iter().next())
    }

    async fn claim(&self, machine_name: &str, namespace: &str) -> Result<Hardware> {
        if let Some(mut hardware) = self.owned(machine_name, namespace).await? {
            debug!(hardware = %hardware.name_any(), "found hardware claimed earlier");
            if !hardware.add_finalizer(MACHINE_FINALIZER) {
                return Ok(hardware);
            }
            let hardware = self
                .store
                .replace(&hardware)
                .await
                .context("adding finalizer to claimed hardware")?;
            info!(hardware = %hardware.name_any(), "restored finalizer on claimed hardware");
            return Ok(hardware);
        }

        let mut candidates: Vec<Hardware> = self
            .store
            .list(Some(namespace), &Selector::unowned())
            .await
            .context("listing available hardware")?;
        candidates.sort_by_key(ResourceExt::name_any);
        let Some(mut hardware) = candidates.into_iter().next() else {
            return Err(Error::NoHardwareAvailable);
        };

        let labels = hardware.labels_mut();
        labels.insert(HARDWARE_OWNER_NAME_LABEL.to_string(), machine_name.to_string());
        labels.insert(HARDWARE_OWNER_NAMESPACE_LABEL.to_string(), namespace.to_string());
        hardware.add_finalizer(MACHINE_FINALIZER);

        let hardware = self.store.replace(&hardware).await.context("claiming hardware")?;
        info!(hardware = %hardware.name_any(), "claimed hardware");
        Ok(hardware)
    }

    /// Drop the machine's claim on its hardware
    ///
    /// Looks the hardware up by `hardware_name` when the claim was recorded on the machine and
    /// through the owner labels otherwise. Missing hardware, hardware that is already free and
    /// hardware claimed by another machine are all left alone.
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        hardware_name: Option<&str>,
        machine_name: &str,
        namespace: &str,
    ) -> Result<()> {
        (|| self.unclaim(hardware_name, machine_name, namespace))
            .retry(self.backoff())
            .when(Error::is_conflict)
            .notify(|err: &Error, delay: Duration| {
                debug!(error = %err, ?delay, "conflict releasing hardware, retrying");
            })
            .await
    }

    async fn unclaim(&self, hardware_name: Option<&str>, machine_name: &str, namespace: &str) -> Result<()> {
        let hardware = match hardware_name {
            Some(name) => self
                .store
                .get_opt::<Hardware>(namespace, name)
                .await
                .context("getting hardware")?,
            None => self.owned(machine_name, namespace).await?,
        };
        let Some(mut hardware) = hardware else {
            debug!("no hardware to release");
            return Ok(());
        };

        if let Some(owner) = hardware.owner() {
            if owner != (machine_name, namespace) {
                warn!(hardware = %hardware.name_any(), owner = ?owner, "hardware is claimed by another machine");
                return Ok(());
            }
        }

        let labels = hardware.labels_mut();
        let unlabelled = labels.remove(HARDWARE_OWNER_NAME_LABEL).is_some()
            | labels.remove(HARDWARE_OWNER_NAMESPACE_LABEL).is_some();
        let unfinalized = hardware.remove_finalizer(MACHINE_FINALIZER);
        if !(unlabelled || unfinalized) {
            debug!(hardware = %hardware.name_any(), "hardware already released");
            return Ok(());
        }

        self.store.replace(&hardware).await.context("releasing hardware")?;
        info!(hardware = %hardware.name_any(), "released hardware");
        Ok(())
    }
}
