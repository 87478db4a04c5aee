use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use tracing::{debug, info};

use super::MetricSource;
use crate::context::ContextHandle;
use crate::error::{ErrorKind, PmError};
use crate::model::InstanceProfile;

/// Largest domain a PMID can carry.
const MAX_DOMAIN: u32 = (1 << 9) - 1;

pub(crate) struct AgentSlot {
    pub(crate) source: Box<dyn MetricSource>,
    /// Context and profile generation this agent last received.
    last_profiled: Option<(ContextHandle, u64)>,
}

impl AgentSlot {
    /// Sends the context's profile unless this agent already has it.
    pub(crate) fn ensure_profile(
        &mut self,
        handle: ContextHandle,
        profile: &InstanceProfile,
    ) -> Result<(), PmError> {
        let wanted = (handle, profile.generation());
        if self.last_profiled == Some(wanted) {
            return Ok(());
        }
        self.last_profiled = None;
        self.source.profile(profile)?;
        debug!(
            domain = self.source.domain(),
            handle = %handle,
            generation = wanted.1,
            "profile sent to agent"
        );
        self.last_profiled = Some(wanted);
        Ok(())
    }
}

type Registry = BTreeMap<u32, Arc<Mutex<AgentSlot>>>;

static AGENTS: LazyLock<Mutex<Registry>> = LazyLock::new(|| Mutex::new(BTreeMap::new()));

fn agents() -> MutexGuard<'static, Registry> {
    AGENTS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn lock_slot(slot: &Mutex<AgentSlot>) -> MutexGuard<'_, AgentSlot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Makes `source` the agent for its domain, replacing any previous one.
pub fn register_agent(source: Box<dyn MetricSource>) -> Result<(), PmError> {
    let domain = source.domain();
    if domain > MAX_DOMAIN {
        return Err(PmError::new(
            ErrorKind::InvalidArgument,
            format!("agent domain {domain} exceeds {MAX_DOMAIN}"),
        ));
    }
    let slot = AgentSlot {
        source,
        last_profiled: None,
    };
    if agents()
        .insert(domain, Arc::new(Mutex::new(slot)))
        .is_some()
    {
        info!(domain, "agent replaced");
    } else {
        info!(domain, "agent registered");
    }
    Ok(())
}

pub fn unregister_agent(domain: u32) -> bool {
    let removed = agents().remove(&domain).is_some();
    if removed {
        info!(domain, "agent unregistered");
    }
    removed
}

pub fn registered_domains() -> Vec<u32> {
    agents().keys().copied().collect()
}

pub(crate) fn agent(domain: u32) -> Option<Arc<Mutex<AgentSlot>>> {
    agents().get(&domain).cloned()
}

/// Drops the profile-sent marks held for a destroyed context, so a new
/// context reusing its handle gets its own profile sent.
pub(crate) fn forget_context(handle: ContextHandle) {
    let slots: Vec<_> = agents().values().cloned().collect();
    for slot in slots {
        let mut slot = lock_slot(&slot);
        if slot.last_profiled.is_some_and(|(h, _)| h == handle) {
            slot.last_profiled = None;
        }
    }
}
