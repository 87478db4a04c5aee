//! Context manager.
//!
//! A context is one logical connection to a metrics source: a collector
//! (host), a recorded archive, or the in-process agents (local). Contexts
//! live in a process-wide handle table; each thread has its own notion of
//! the *current* context used by the free functions of this module.
//!
//! ```text
//!  thread A: CURRENT=0 ─┐        ┌─────────── CONTEXTS ───────────┐
//!  thread B: CURRENT=2 ─┼──────► │ 0: host    ─► HostBackend      │
//!                       │        │ 1: (free)                      │
//!                       └──────► │ 2: archive ─► ArchiveSession   │
//!                                └────────────────────────────────┘
//! ```
//!
//! The table lock only guards handle allocation and lookup. Every context
//! has its own lock held for the duration of a call, so one context is
//! never used by two threads at once while different contexts run in
//! parallel.

mod host;
mod table;

pub use table::{ContextHandle, HandleTable};

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, TryLockError};

use tracing::{debug, info};

use crate::archive::{ArchiveLabel, ArchiveSession, ReplayMode};
use crate::config::{ClientConfig, client_config};
use crate::derived::{resolve_desc, resolve_fetch};
use crate::error::{ErrorKind, PmError};
use crate::local;
use crate::model::{Desc, FetchResult, InDom, InDomInstances, InstanceProfile, Pmid, Timestamp};
use host::HostBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Host,
    Archive,
    Local,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKind::Host => write!(f, "host"),
            ContextKind::Archive => write!(f, "archive"),
            ContextKind::Local => write!(f, "local"),
        }
    }
}

impl FromStr for ContextKind {
    type Err = PmError;

    fn from_str(s: &str) -> Result<Self, PmError> {
        match s {
            "host" => Ok(ContextKind::Host),
            "archive" => Ok(ContextKind::Archive),
            "local" => Ok(ContextKind::Local),
            other => Err(PmError::new(
                ErrorKind::InvalidArgument,
                format!("unknown context kind {other:?}"),
            )),
        }
    }
}

enum Backend {
    Host(HostBackend),
    Archive(ArchiveSession),
    Local,
}

struct Context {
    backend: Backend,
    profile: InstanceProfile,
    descs: HashMap<Pmid, Desc>,
}

struct ContextEntry {
    kind: ContextKind,
    target: String,
    state: Mutex<Context>,
}

static CONTEXTS: LazyLock<Mutex<HandleTable<Arc<ContextEntry>>>> =
    LazyLock::new(|| Mutex::new(HandleTable::new()));

thread_local! {
    static CURRENT: Cell<Option<ContextHandle>> = const { Cell::new(None) };
}

fn contexts() -> MutexGuard<'static, HandleTable<Arc<ContextEntry>>> {
    CONTEXTS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_state(entry: &ContextEntry) -> MutexGuard<'_, Context> {
    entry
        .state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn bad_context(handle: ContextHandle) -> PmError {
    PmError::new(ErrorKind::BadContext, format!("no context with handle {handle}"))
}

fn lookup(handle: ContextHandle) -> Result<Arc<ContextEntry>, PmError> {
    contexts()
        .get(handle)
        .cloned()
        .ok_or_else(|| bad_context(handle))
}

fn with_context<T>(
    handle: ContextHandle,
    f: impl FnOnce(&mut Context) -> Result<T, PmError>,
) -> Result<T, PmError> {
    let entry = lookup(handle)?;
    let mut ctx = lock_state(&entry);
    f(&mut ctx)
}

/// Adds a fully opened context to the table and returns its handle.
fn register(kind: ContextKind, target: &str, mut ctx: Context) -> Result<ContextHandle, PmError> {
    let mut table = contexts();
    if kind == ContextKind::Local && table.iter().any(|(_, e)| e.kind == ContextKind::Local) {
        return Err(PmError::new(
            ErrorKind::LocalInUse,
            "a local context is already open",
        ));
    }
    let handle = table.next_free();
    if let Backend::Host(host) = &mut ctx.backend {
        host.bind(handle);
    }
    Ok(table.insert(Arc::new(ContextEntry {
        kind,
        target: target.to_string(),
        state: Mutex::new(ctx),
    })))
}

// ============================================================
// Context lifecycle
// ============================================================

/// Opens a context with the process-wide client configuration and makes it
/// current for the calling thread.
///
/// `target` is a host spec (`host[:port][?attr=value]`), an archive base
/// path, or ignored for local contexts.
pub fn new_context(kind: ContextKind, target: &str) -> Result<ContextHandle, PmError> {
    new_context_with_config(kind, target, client_config())
}

pub fn new_context_with_config(
    kind: ContextKind,
    target: &str,
    config: ClientConfig,
) -> Result<ContextHandle, PmError> {
    let backend = match kind {
        ContextKind::Host => Backend::Host(HostBackend::connect(target.parse()?, config)?),
        ContextKind::Archive => Backend::Archive(ArchiveSession::open(target)?),
        ContextKind::Local => Backend::Local,
    };
    let ctx = Context {
        backend,
        profile: InstanceProfile::new(),
        descs: HashMap::new(),
    };
    let handle = register(kind, target, ctx)?;
    CURRENT.set(Some(handle));
    info!(handle = %handle, kind = %kind, target, "context opened");
    Ok(handle)
}

/// Makes `handle` current for the calling thread.
pub fn use_context(handle: ContextHandle) -> Result<(), PmError> {
    lookup(handle)?;
    CURRENT.set(Some(handle));
    debug!(handle = %handle, "context switched");
    Ok(())
}

/// The calling thread's current context.
pub fn which_context() -> Result<ContextHandle, PmError> {
    CURRENT
        .get()
        .ok_or_else(|| PmError::new(ErrorKind::NoContext, "no current context"))
}

/// Opens a copy of the current context (new connection or file set, same
/// profile, position and descriptor cache) and makes it current.
pub fn dup_context() -> Result<ContextHandle, PmError> {
    let source = which_context()?;
    let entry = lookup(source)?;
    let ctx = {
        let ctx = lock_state(&entry);
        let backend = match &ctx.backend {
            Backend::Host(host) => Backend::Host(host.duplicate()?),
            Backend::Archive(session) => Backend::Archive(session.duplicate()?),
            Backend::Local => {
                return Err(PmError::new(
                    ErrorKind::LocalInUse,
                    "local contexts cannot be duplicated",
                ));
            }
        };
        Context {
            backend,
            profile: ctx.profile.clone(),
            descs: ctx.descs.clone(),
        }
    };
    let handle = register(entry.kind, &entry.target, ctx)?;
    CURRENT.set(Some(handle));
    info!(handle = %handle, from = %source, "context duplicated");
    Ok(handle)
}

/// Closes the context and frees its handle for reuse.
pub fn destroy_context(handle: ContextHandle) -> Result<(), PmError> {
    let entry = contexts()
        .remove(handle)
        .ok_or_else(|| bad_context(handle))?;
    // waits for a call in flight on another thread
    if let Backend::Host(host) = &mut lock_state(&entry).backend {
        host.close();
    }
    if entry.kind == ContextKind::Local {
        local::forget_context(handle);
    }
    if CURRENT.get() == Some(handle) {
        CURRENT.set(None);
    }
    info!(handle = %handle, kind = %entry.kind, "context destroyed");
    Ok(())
}

/// Re-dials the collector of a host context. Archive and local contexts
/// have nothing to reconnect.
pub fn reconnect_context(handle: ContextHandle) -> Result<(), PmError> {
    with_context(handle, |ctx| match &mut ctx.backend {
        Backend::Host(host) => host.reconnect(),
        Backend::Archive(_) | Backend::Local => Ok(()),
    })
}

pub fn context_host_name(handle: ContextHandle) -> Result<String, PmError> {
    with_context(handle, |ctx| {
        Ok(match &ctx.backend {
            Backend::Host(host) => host.host().to_string(),
            Backend::Archive(session) => session.label().host.clone(),
            Backend::Local => "localhost".to_string(),
        })
    })
}

/// One line per open context; `*` marks the calling thread's current one.
pub fn dump_contexts() -> String {
    let current = CURRENT.get();
    let entries: Vec<(ContextHandle, Arc<ContextEntry>)> = contexts()
        .iter()
        .map(|(handle, entry)| (handle, Arc::clone(entry)))
        .collect();

    let mut out = String::new();
    for (handle, entry) in entries {
        let marker = if current == Some(handle) { '*' } else { ' ' };
        let state = match entry.state.try_lock() {
            Ok(ctx) => ctx.describe(),
            Err(TryLockError::WouldBlock) => "busy".to_string(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().describe(),
        };
        let _ = writeln!(
            out,
            "{marker}{handle:>3} {:<7} {} {state}",
            entry.kind, entry.target
        );
    }
    out
}

// ============================================================
// Per-context operations
// ============================================================

impl Context {
    fn lookup_desc(&mut self, pmid: Pmid) -> Result<Desc, PmError> {
        if let Some(desc) = self.descs.get(&pmid) {
            return Ok(*desc);
        }
        let desc = match &mut self.backend {
            Backend::Host(host) => host.lookup_desc(pmid)?,
            Backend::Archive(session) => session.desc(pmid)?,
            Backend::Local => local::describe_local(pmid)?,
        };
        self.descs.insert(pmid, desc);
        Ok(desc)
    }

    fn fetch(&mut self, handle: ContextHandle, pmids: &[Pmid]) -> Result<FetchResult, PmError> {
        if pmids.is_empty() {
            return Err(PmError::new(ErrorKind::InvalidArgument, "empty metric list"));
        }
        match &mut self.backend {
            Backend::Host(host) => host.fetch(&self.profile, pmids),
            Backend::Archive(session) => session.fetch(pmids, &self.profile),
            Backend::Local => local::fetch_local(handle, &self.profile, pmids),
        }
    }

    fn store(&mut self, result: &FetchResult) -> Result<(), PmError> {
        match &mut self.backend {
            Backend::Host(host) => host.store(result),
            Backend::Archive(session) => Err(PmError::new(
                ErrorKind::NotWritable,
                format!("archive {} is read-only", session.reader().base().display()),
            )),
            Backend::Local => local::store_local(result),
        }
    }

    fn get_indom(&mut self, indom: InDom) -> Result<InDomInstances, PmError> {
        match &mut self.backend {
            Backend::Host(host) => host.get_indom(indom),
            Backend::Archive(session) => session.indom(indom),
            Backend::Local => local::instances_local(indom),
        }
    }

    fn session(&mut self) -> Result<&mut ArchiveSession, PmError> {
        match &mut self.backend {
            Backend::Archive(session) => Ok(session),
            _ => Err(PmError::new(ErrorKind::BadMode, "not an archive context")),
        }
    }

    fn describe(&self) -> String {
        let profile = self.profile.generation();
        match &self.backend {
            Backend::Host(host) => format!(
                "{} profile#{profile} descs={}",
                if host.is_connected() {
                    "connected"
                } else {
                    "disconnected"
                },
                self.descs.len()
            ),
            Backend::Archive(session) => format!(
                "{} at {} profile#{profile} descs={}",
                session.mode(),
                session.position(),
                self.descs.len()
            ),
            Backend::Local => format!(
                "agents={:?} profile#{profile}",
                local::registered_domains()
            ),
        }
    }
}

impl ContextHandle {
    pub fn kind(self) -> Result<ContextKind, PmError> {
        Ok(lookup(self)?.kind)
    }

    /// Descriptor for `pmid`, cached per context.
    pub fn lookup_desc(self, pmid: Pmid) -> Result<Desc, PmError> {
        let primary = with_context(self, |ctx| ctx.lookup_desc(pmid));
        resolve_desc(self, pmid, primary)
    }

    /// One value set per requested PMID, in request order. Per-metric
    /// failures are reported in the value sets, not as `Err`.
    pub fn fetch(self, pmids: &[Pmid]) -> Result<FetchResult, PmError> {
        let primary = with_context(self, |ctx| ctx.fetch(self, pmids));
        resolve_fetch(self, pmids, primary)
    }

    pub fn store(self, result: &FetchResult) -> Result<(), PmError> {
        with_context(self, |ctx| ctx.store(result))
    }

    pub fn get_indom(self, indom: InDom) -> Result<InDomInstances, PmError> {
        with_context(self, |ctx| ctx.get_indom(indom))
    }

    pub fn add_profile(self, indom: InDom, instances: &[i32]) -> Result<(), PmError> {
        with_context(self, |ctx| {
            ctx.profile.add(indom, instances);
            Ok(())
        })
    }

    pub fn del_profile(self, indom: InDom, instances: &[i32]) -> Result<(), PmError> {
        with_context(self, |ctx| {
            ctx.profile.delete(indom, instances);
            Ok(())
        })
    }

    pub fn set_mode(self, mode: ReplayMode, at: Option<Timestamp>) -> Result<(), PmError> {
        with_context(self, |ctx| ctx.session()?.set_mode(mode, at))
    }

    pub fn replay_mode(self) -> Result<ReplayMode, PmError> {
        with_context(self, |ctx| Ok(ctx.session()?.mode()))
    }

    pub fn replay_position(self) -> Result<Timestamp, PmError> {
        with_context(self, |ctx| Ok(ctx.session()?.position()))
    }

    pub fn archive_label(self) -> Result<ArchiveLabel, PmError> {
        with_context(self, |ctx| Ok(ctx.session()?.label().clone()))
    }

    pub fn host_name(self) -> Result<String, PmError> {
        context_host_name(self)
    }

    pub fn reconnect(self) -> Result<(), PmError> {
        reconnect_context(self)
    }

    pub fn destroy(self) -> Result<(), PmError> {
        destroy_context(self)
    }
}

// ── current-context shorthands ──

pub fn lookup_desc(pmid: Pmid) -> Result<Desc, PmError> {
    which_context()?.lookup_desc(pmid)
}

pub fn fetch(pmids: &[Pmid]) -> Result<FetchResult, PmError> {
    which_context()?.fetch(pmids)
}

pub fn store(result: &FetchResult) -> Result<(), PmError> {
    which_context()?.store(result)
}

pub fn get_indom(indom: InDom) -> Result<InDomInstances, PmError> {
    which_context()?.get_indom(indom)
}

pub fn add_profile(indom: InDom, instances: &[i32]) -> Result<(), PmError> {
    which_context()?.add_profile(indom, instances)
}

pub fn del_profile(indom: InDom, instances: &[i32]) -> Result<(), PmError> {
    which_context()?.del_profile(indom, instances)
}

pub fn set_mode(mode: ReplayMode, at: Option<Timestamp>) -> Result<(), PmError> {
    which_context()?.set_mode(mode, at)
}

pub fn replay_position() -> Result<Timestamp, PmError> {
    which_context()?.replay_position()
}

pub fn archive_label() -> Result<ArchiveLabel, PmError> {
    which_context()?.archive_label()
}
