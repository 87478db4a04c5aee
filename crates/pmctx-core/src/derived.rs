//! Fallback to the derived-metric evaluator.
//!
//! When a back end does not know a metric (`UnknownMetric`, `UnknownAgent`),
//! the same request is retried once against the installed evaluator and its
//! outcome replaces the original one. Any other error is final.
//!
//! The evaluator may fetch its operands through the same context, so the
//! retry always runs with no context lock held.

use std::sync::{Arc, LazyLock, RwLock};

use tracing::debug;

use crate::context::ContextHandle;
use crate::error::{ErrorKind, PmError};
use crate::model::{Desc, FetchResult, Pmid, Timestamp, ValueSet};

pub trait DerivedEvaluator: Send + Sync {
    fn describe(&self, handle: ContextHandle, pmid: Pmid) -> Result<Desc, PmError>;

    /// One value set per requested PMID, in order.
    fn fetch(&self, handle: ContextHandle, pmids: &[Pmid]) -> Result<Vec<ValueSet>, PmError>;
}

static EVALUATOR: LazyLock<RwLock<Option<Arc<dyn DerivedEvaluator>>>> =
    LazyLock::new(|| RwLock::new(None));

/// Installs (or with `None` removes) the process-wide evaluator.
pub fn set_derived_evaluator(evaluator: Option<Arc<dyn DerivedEvaluator>>) {
    match EVALUATOR.write() {
        Ok(mut guard) => *guard = evaluator,
        Err(poisoned) => *poisoned.into_inner() = evaluator,
    }
}

fn evaluator() -> Option<Arc<dyn DerivedEvaluator>> {
    match EVALUATOR.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn eligible(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::UnknownMetric | ErrorKind::UnknownAgent)
}

/// Applies the fallback to a whole-call outcome.
pub fn resolve_with<T>(
    primary: Result<T, PmError>,
    retry: impl FnOnce(&dyn DerivedEvaluator) -> Result<T, PmError>,
) -> Result<T, PmError> {
    let err = match primary {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    if !eligible(err.kind()) {
        return Err(err);
    }
    let Some(evaluator) = evaluator() else {
        return Err(err);
    };
    debug!(error = %err, "retrying with derived-metric evaluator");
    retry(evaluator.as_ref())
}

pub(crate) fn resolve_desc(
    handle: ContextHandle,
    pmid: Pmid,
    primary: Result<Desc, PmError>,
) -> Result<Desc, PmError> {
    resolve_with(primary, |ev| ev.describe(handle, pmid))
}

pub(crate) fn resolve_fetch(
    handle: ContextHandle,
    pmids: &[Pmid],
    primary: Result<FetchResult, PmError>,
) -> Result<FetchResult, PmError> {
    let mut result = resolve_with(primary, |ev| {
        let vsets = ev.fetch(handle, pmids)?;
        Ok(FetchResult::new(Timestamp::now(), vsets))
    })?;
    patch_value_sets(handle, &mut result);
    Ok(result)
}

/// Per-metric form of the fallback: value sets failing with an eligible
/// status are refetched from the evaluator in one call.
fn patch_value_sets(handle: ContextHandle, result: &mut FetchResult) {
    let failed: Vec<usize> = result
        .vsets
        .iter()
        .enumerate()
        .filter(|(_, vs)| matches!(vs.values, Err(kind) if eligible(kind)))
        .map(|(idx, _)| idx)
        .collect();
    if failed.is_empty() {
        return;
    }
    let Some(evaluator) = evaluator() else {
        return;
    };

    let pmids: Vec<Pmid> = failed.iter().map(|&i| result.vsets[i].pmid).collect();
    match evaluator.fetch(handle, &pmids) {
        Ok(replies) => {
            for &idx in &failed {
                let pmid = result.vsets[idx].pmid;
                if let Some(vs) = replies.iter().find(|vs| vs.pmid == pmid) {
                    result.vsets[idx] = vs.clone();
                }
            }
        }
        Err(e) => {
            debug!(error = %e, metrics = pmids.len(), "derived-metric evaluation failed");
            for &idx in &failed {
                let pmid = result.vsets[idx].pmid;
                result.vsets[idx] = ValueSet::error(pmid, e.kind());
            }
        }
    }
}
