//! Purpose: Decide, per administrative change, between delivering now and queuing.
//! Exports: `SyncPolicy`, `SyncOutcome`, `QueueReason`, `SkipReason`, `InstanceLookup`.
//! Role: Caller-side orchestration used by kadmin hosts and by `krb5-sync -q`.
//! Invariants: A pending entry for the same key always forces queuing.
//! Invariants: Only `ErrorKind::Delivery` is recovered (by queuing); queue errors are fatal.
//! Invariants: A password change without a password is neither delivered nor queued.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::core::delivery::Delivery;
use crate::core::error::{Error, ErrorKind};
use crate::core::key::{Domain, Operation};
use crate::core::principal::Principal;
use crate::core::queue::Queue;

/// Answers whether `base/instance` exists in the local KDC database;
/// `base.with_instance(instance)` names the principal to look up.
pub trait InstanceLookup {
    fn instance_exists(&self, base: &Principal, instance: &str) -> Result<bool, Error>;
}

/// For hosts without database access; no instance ever exists.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoInstances;

impl InstanceLookup for NoInstances {
    fn instance_exists(&self, _base: &Principal, _instance: &str) -> Result<bool, Error> {
        Ok(false)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum QueueReason {
    /// An older change for the same key is still pending.
    Conflict,
    /// `queue_only` is set.
    Forced,
    /// Delivery was attempted and failed with this message.
    DeliveryFailed(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipReason {
    /// Key randomization; there is no plaintext to propagate.
    NoPassword,
    /// The principal's instance is not propagated.
    Instance,
    /// The configured base instance exists and is propagated instead.
    BaseInstanceExists,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SyncOutcome {
    Delivered,
    Queued { path: PathBuf, reason: QueueReason },
    Skipped(SkipReason),
}

pub struct SyncPolicy<'a, D, L = NoInstances> {
    config: &'a SyncConfig,
    delivery: D,
    instances: L,
}

impl<'a, D: Delivery> SyncPolicy<'a, D, NoInstances> {
    pub fn new(config: &'a SyncConfig, delivery: D) -> Self {
        Self {
            config,
            delivery,
            instances: NoInstances,
        }
    }
}

impl<'a, D: Delivery, L: InstanceLookup> SyncPolicy<'a, D, L> {
    pub fn with_instance_lookup<M: InstanceLookup>(self, instances: M) -> SyncPolicy<'a, D, M> {
        SyncPolicy {
            config: self.config,
            delivery: self.delivery,
            instances,
        }
    }

    pub fn sync_password(
        &self,
        principal: &Principal,
        password: Option<&str>,
    ) -> Result<SyncOutcome, Error> {
        let Some(password) = password else {
            debug!(%principal, "no password supplied, nothing to propagate");
            return Ok(SyncOutcome::Skipped(SkipReason::NoPassword));
        };
        if let Some(reason) = self.skip_reason(principal, true)? {
            return Ok(SyncOutcome::Skipped(reason));
        }
        self.propagate(principal, Operation::Password, Some(password))
    }

    pub fn sync_status(&self, principal: &Principal, enabled: bool) -> Result<SyncOutcome, Error> {
        if let Some(reason) = self.skip_reason(principal, false)? {
            return Ok(SyncOutcome::Skipped(reason));
        }
        self.propagate(principal, Operation::status(enabled), None)
    }

    fn propagate(
        &self,
        principal: &Principal,
        operation: Operation,
        password: Option<&str>,
    ) -> Result<SyncOutcome, Error> {
        let queue = Queue::from_config(self.config)?;
        let domain = Domain::Ad;

        if self.config.queue_only {
            let path = queue.enqueue(principal, domain, operation, password)?;
            return Ok(queued(path, QueueReason::Forced));
        }
        if let Some(path) = queue.check_and_enqueue(principal, domain, operation, password)? {
            info!(%principal, %operation, "earlier change still queued, queuing");
            return Ok(queued(path, QueueReason::Conflict));
        }

        match self.delivery.deliver(principal, operation, password) {
            Ok(()) => Ok(SyncOutcome::Delivered),
            Err(err) if err.kind() == ErrorKind::Delivery => {
                let message = err.to_string();
                info!(%principal, %operation, error = %message, "AD change failed, queuing");
                let path = queue.enqueue(principal, domain, operation, password)?;
                Ok(queued(path, QueueReason::DeliveryFailed(message)))
            }
            Err(err) => Err(err),
        }
    }

    fn skip_reason(&self, principal: &Principal, password_change: bool) -> Result<Option<SkipReason>, Error> {
        if principal.component_count() > 1 {
            let allowed = principal
                .instance()
                .is_some_and(|instance| self.config.instance_allowed(instance));
            if !allowed {
                debug!(%principal, "ignoring principal with non-null instance");
                return Ok(Some(SkipReason::Instance));
            }
            return Ok(None);
        }
        if password_change {
            if let Some(base) = self.config.ad_base_instance.as_deref() {
                if self.instances.instance_exists(principal, base)? {
                    debug!(%principal, instance = base, "ignoring principal because instance exists");
                    return Ok(Some(SkipReason::BaseInstanceExists));
                }
            }
        }
        Ok(None)
    }
}

fn queued(path: PathBuf, reason: QueueReason) -> SyncOutcome {
    SyncOutcome::Queued { path, reason }
}
