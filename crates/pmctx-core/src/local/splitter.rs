//! Fan-out of one multi-metric request across in-process agents.
//!
//! ```text
//! request:  [1.0.0, 2.0.0, 1.0.1, 3.0.0, 2.0.1]
//!              │      │      │      │      │
//! domain 1: fetch([1.0.0, 1.0.1])           ──► slots 0, 2
//! domain 2: fetch([2.0.0, 2.0.1])           ──► slots 1, 4
//! domain 3: no agent                        ──► slot 3 = UnknownAgent
//! ```

use tracing::{trace, warn};

use super::registry::{agent, lock_slot};
use crate::context::ContextHandle;
use crate::error::{ErrorKind, PmError};
use crate::model::{
    Desc, FetchResult, InDom, InDomInstances, InstanceProfile, Pmid, Timestamp, ValueSet,
};

/// Fetches `pmids` from the registered agents on behalf of `handle`.
///
/// The result holds exactly one value set per requested PMID, in request
/// order. Missing agents and failing agents only affect their own slots.
pub fn fetch_local(
    handle: ContextHandle,
    profile: &InstanceProfile,
    pmids: &[Pmid],
) -> Result<FetchResult, PmError> {
    if pmids.is_empty() {
        return Err(PmError::new(ErrorKind::InvalidArgument, "empty metric list"));
    }

    let mut slots: Vec<Option<ValueSet>> = vec![None; pmids.len()];
    for first in 0..pmids.len() {
        if slots[first].is_some() {
            continue;
        }
        let domain = pmids[first].domain();
        let group: Vec<usize> = (first..pmids.len())
            .filter(|&j| slots[j].is_none() && pmids[j].domain() == domain)
            .collect();

        let Some(slot) = agent(domain) else {
            trace!(domain, "no agent for domain");
            for &j in &group {
                slots[j] = Some(ValueSet::error(pmids[j], ErrorKind::UnknownAgent));
            }
            continue;
        };

        let request: Vec<Pmid> = group.iter().map(|&j| pmids[j]).collect();
        let outcome = {
            let mut slot = lock_slot(&slot);
            slot.ensure_profile(handle, profile)
                .and_then(|()| slot.source.fetch(&request))
        };

        match outcome {
            Ok(reply) => {
                if reply.len() != request.len() {
                    warn!(
                        domain,
                        expected = request.len(),
                        got = reply.len(),
                        "agent reply has wrong number of value sets"
                    );
                }
                let mut reply = reply.into_iter();
                for &j in &group {
                    let vs = match reply.next() {
                        Some(vs) if vs.pmid == pmids[j] => vs,
                        _ => ValueSet::error(pmids[j], ErrorKind::ProtocolViolation),
                    };
                    slots[j] = Some(vs);
                }
            }
            Err(e) => {
                warn!(domain, error = %e, "agent fetch failed");
                for &j in &group {
                    slots[j] = Some(ValueSet::error(pmids[j], e.kind()));
                }
            }
        }
    }

    let vsets = slots
        .into_iter()
        .zip(pmids)
        .map(|(slot, pmid)| {
            slot.unwrap_or_else(|| ValueSet::error(*pmid, ErrorKind::ProtocolViolation))
        })
        .collect();
    Ok(FetchResult::new(Timestamp::now(), vsets))
}

pub fn describe_local(pmid: Pmid) -> Result<Desc, PmError> {
    let slot = agent(pmid.domain()).ok_or_else(|| no_agent(pmid.domain()))?;
    let desc = lock_slot(&slot).source.describe(pmid)?;
    Ok(desc)
}

pub fn instances_local(indom: InDom) -> Result<InDomInstances, PmError> {
    let slot = agent(indom.domain()).ok_or_else(|| no_agent(indom.domain()))?;
    let instances = lock_slot(&slot).source.instances(indom)?;
    Ok(instances)
}

/// Hands each agent the value sets of its own domain.
///
/// Every domain must have an agent before anything is written. Domains
/// are then written in ascending order and the first agent to refuse
/// stops the rest; earlier domains keep what they stored.
pub fn store_local(result: &FetchResult) -> Result<(), PmError> {
    let mut domains: Vec<u32> = result.vsets.iter().map(|vs| vs.pmid.domain()).collect();
    domains.sort_unstable();
    domains.dedup();

    let mut slots = Vec::with_capacity(domains.len());
    for domain in domains {
        let slot = agent(domain).ok_or_else(|| no_agent(domain))?;
        slots.push((domain, slot));
    }

    for (domain, slot) in slots {
        let group: Vec<ValueSet> = result
            .vsets
            .iter()
            .filter(|vs| vs.pmid.domain() == domain)
            .cloned()
            .collect();
        lock_slot(&slot).source.store(&group)?;
        trace!(domain, vsets = group.len(), "stored to agent");
    }
    Ok(())
}

fn no_agent(domain: u32) -> PmError {
    PmError::new(
        ErrorKind::UnknownAgent,
        format!("no agent registered for domain {domain}"),
    )
}
