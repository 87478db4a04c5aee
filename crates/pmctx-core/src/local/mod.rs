//! In-process metric sources and the fetch splitter that fans a request
//! out across them.

mod registry;
mod splitter;

pub use registry::{register_agent, registered_domains, unregister_agent};
pub use splitter::{describe_local, fetch_local, instances_local, store_local};

pub(crate) use registry::forget_context;

use crate::error::{ErrorKind, PmError};
use crate::model::{Desc, InDom, InDomInstances, InstanceProfile, Pmid, ValueSet};

/// One in-process agent, owning every metric of a single domain.
///
/// Calls are never made concurrently for the same agent.
pub trait MetricSource: Send {
    fn domain(&self) -> u32;

    /// Installs the instance profile that later fetches must honour.
    fn profile(&mut self, profile: &InstanceProfile) -> Result<(), PmError>;

    /// One value set per requested PMID, in the order given. A per-metric
    /// problem belongs in its value set; `Err` fails the whole call.
    fn fetch(&mut self, pmids: &[Pmid]) -> Result<Vec<ValueSet>, PmError>;

    fn describe(&mut self, pmid: Pmid) -> Result<Desc, PmError>;

    fn instances(&mut self, indom: InDom) -> Result<InDomInstances, PmError>;

    fn store(&mut self, vsets: &[ValueSet]) -> Result<(), PmError> {
        let _ = vsets;
        Err(PmError::new(
            ErrorKind::NotWritable,
            format!("agent for domain {} does not accept stores", self.domain()),
        ))
    }
}
