//! Test doubles: fake in-process agents and a loopback collector.

use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::thread;

use crate::config::DEFAULT_MAX_FRAME_LEN;
use crate::error::{ErrorKind, PmError};
use crate::local::MetricSource;
use crate::model::{
    Desc, FetchResult, IN_NULL, InDom, InDomInstances, InstanceProfile, InstanceValue, Pmid,
    Semantics, Timestamp, Units, Value, ValueSet, ValueType,
};
use crate::wire::{Attribute, Connection, Pdu};

static GLOBAL_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Serializes tests touching process-wide registries.
pub(crate) fn global_lock() -> MutexGuard<'static, ()> {
    GLOBAL_LOCK.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Clone, Default)]
pub(crate) struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================
// FakeAgent
// ============================================================

/// Agent publishing three U32 metrics `domain.0.{0,1,2}`. Items 0 and 1 are
/// singular with value `domain * 100 + item`; item 2 has two instances of
/// `InDom(domain, 0)` valued `domain * 100 + 2` and `+ 3`.
pub(crate) struct FakeAgent {
    domain: u32,
    errors: BTreeMap<u32, ErrorKind>,
    fail_fetch: Option<ErrorKind>,
    fail_profile: Option<ErrorKind>,
    short_reply: bool,
    writable: bool,
    profile_calls: CallCounter,
    fetch_log: Arc<Mutex<Vec<Vec<Pmid>>>>,
    stored: Arc<Mutex<Vec<ValueSet>>>,
}

impl FakeAgent {
    pub(crate) fn new(domain: u32) -> Self {
        Self {
            domain,
            errors: BTreeMap::new(),
            fail_fetch: None,
            fail_profile: None,
            short_reply: false,
            writable: false,
            profile_calls: CallCounter::default(),
            fetch_log: Arc::default(),
            stored: Arc::default(),
        }
    }

    /// Item `item` answers with an error value set.
    pub(crate) fn with_error(mut self, item: u32, kind: ErrorKind) -> Self {
        self.errors.insert(item, kind);
        self
    }

    pub(crate) fn failing_fetch(mut self, kind: ErrorKind) -> Self {
        self.fail_fetch = Some(kind);
        self
    }

    pub(crate) fn failing_profile(mut self, kind: ErrorKind) -> Self {
        self.fail_profile = Some(kind);
        self
    }

    /// Drops the last value set of every reply.
    pub(crate) fn short_reply(mut self) -> Self {
        self.short_reply = true;
        self
    }

    pub(crate) fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    pub(crate) fn profile_calls(&self) -> CallCounter {
        self.profile_calls.clone()
    }

    pub(crate) fn fetch_log(&self) -> Arc<Mutex<Vec<Vec<Pmid>>>> {
        Arc::clone(&self.fetch_log)
    }

    pub(crate) fn stored(&self) -> Arc<Mutex<Vec<ValueSet>>> {
        Arc::clone(&self.stored)
    }

    fn indom(&self) -> InDom {
        InDom::new(self.domain, 0)
    }

    fn value_set(&self, pmid: Pmid) -> ValueSet {
        if pmid.domain() != self.domain || pmid.cluster() != 0 || pmid.item() > 2 {
            return ValueSet::error(pmid, ErrorKind::UnknownMetric);
        }
        if let Some(kind) = self.errors.get(&pmid.item()) {
            return ValueSet::error(pmid, *kind);
        }
        let base = self.domain * 100 + pmid.item();
        let values = if pmid.item() == 2 {
            vec![
                InstanceValue::new(0, Value::U32(base)),
                InstanceValue::new(1, Value::U32(base + 1)),
            ]
        } else {
            vec![InstanceValue::new(IN_NULL, Value::U32(base))]
        };
        ValueSet::new(pmid, values)
    }
}

impl MetricSource for FakeAgent {
    fn domain(&self) -> u32 {
        self.domain
    }

    fn profile(&mut self, _profile: &InstanceProfile) -> Result<(), PmError> {
        self.profile_calls.bump();
        match self.fail_profile {
            Some(kind) => Err(PmError::new(kind, "profile rejected")),
            None => Ok(()),
        }
    }

    fn fetch(&mut self, pmids: &[Pmid]) -> Result<Vec<ValueSet>, PmError> {
        self.fetch_log
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(pmids.to_vec());
        if let Some(kind) = self.fail_fetch {
            return Err(PmError::new(kind, "fetch failed"));
        }
        let mut reply: Vec<ValueSet> = pmids.iter().map(|p| self.value_set(*p)).collect();
        if self.short_reply {
            reply.pop();
        }
        Ok(reply)
    }

    fn describe(&mut self, pmid: Pmid) -> Result<Desc, PmError> {
        if pmid.domain() != self.domain || pmid.item() > 2 {
            return Err(PmError::new(
                ErrorKind::UnknownMetric,
                format!("{pmid} not published"),
            ));
        }
        Ok(Desc {
            pmid,
            value_type: ValueType::U32,
            indom: if pmid.item() == 2 {
                self.indom()
            } else {
                InDom::NULL
            },
            semantics: Semantics::Instant,
            units: Units::count(),
        })
    }

    fn instances(&mut self, indom: InDom) -> Result<InDomInstances, PmError> {
        if indom != self.indom() {
            return Err(PmError::new(
                ErrorKind::UnknownInstance,
                format!("{indom} not published"),
            ));
        }
        Ok(InDomInstances::new(
            indom,
            Timestamp::now(),
            vec![(0, "inst0".into()), (1, "inst1".into())],
        ))
    }

    fn store(&mut self, vsets: &[ValueSet]) -> Result<(), PmError> {
        if !self.writable {
            return Err(PmError::new(ErrorKind::NotWritable, "read-only fake"));
        }
        self.stored
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(vsets);
        Ok(())
    }
}

// ============================================================
// FakeCollector
// ============================================================

#[derive(Debug, Default)]
pub(crate) struct CollectorLog {
    pub(crate) profiles: usize,
    pub(crate) desc_requests: usize,
    pub(crate) fetches: Vec<Vec<Pmid>>,
    pub(crate) attrs: Vec<Attribute>,
    pub(crate) stores: Vec<FetchResult>,
}

/// Loopback collector serving one singular U64 metric per descriptor,
/// valued `pmid.item() * 10`. Every accepted connection gets its own thread.
pub(crate) struct FakeCollector {
    addr: SocketAddr,
    log: Arc<Mutex<CollectorLog>>,
}

impl FakeCollector {
    pub(crate) fn spawn(descs: Vec<Desc>) -> Self {
        Self::spawn_with(descs, false)
    }

    /// Accepts connections but never answers.
    pub(crate) fn spawn_silent() -> Self {
        Self::spawn_with(Vec::new(), true)
    }

    fn spawn_with(descs: Vec<Desc>, silent: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(CollectorLog::default()));
        let descs: Arc<BTreeMap<Pmid, Desc>> =
            Arc::new(descs.into_iter().map(|d| (d.pmid, d)).collect());

        let accept_log = Arc::clone(&log);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let log = Arc::clone(&accept_log);
                let descs = Arc::clone(&descs);
                thread::spawn(move || serve(stream, &descs, &log, silent));
            }
        });
        Self { addr, log }
    }

    pub(crate) fn host_spec(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    pub(crate) fn log(&self) -> MutexGuard<'_, CollectorLog> {
        self.log.lock().unwrap()
    }
}

fn serve(
    stream: TcpStream,
    descs: &BTreeMap<Pmid, Desc>,
    log: &Mutex<CollectorLog>,
    silent: bool,
) {
    let mut conn = Connection::new(stream, DEFAULT_MAX_FRAME_LEN, 0);
    while let Ok(pdu) = conn.recv(None) {
        if silent {
            continue;
        }
        let reply = match pdu {
            Pdu::Attr { attr } => {
                log.lock().unwrap().attrs.push(attr);
                Some(Pdu::Error { code: 0 })
            }
            Pdu::Profile { .. } => {
                log.lock().unwrap().profiles += 1;
                None
            }
            Pdu::Fetch { pmids, hires, .. } => {
                log.lock().unwrap().fetches.push(pmids.clone());
                let vsets = pmids
                    .iter()
                    .map(|pmid| match descs.get(pmid) {
                        Some(_) => ValueSet::new(
                            *pmid,
                            vec![InstanceValue::new(
                                IN_NULL,
                                Value::U64(pmid.item() as u64 * 10),
                            )],
                        ),
                        None => ValueSet::error(*pmid, ErrorKind::UnknownMetric),
                    })
                    .collect();
                Some(Pdu::Result {
                    result: FetchResult::new(Timestamp::new(1_700_000_000, 0), vsets),
                    hires,
                })
            }
            Pdu::DescReq { pmid } => Some(match log_desc_request(log, descs, pmid) {
                Some(desc) => Pdu::Desc { desc: *desc },
                None => Pdu::Error {
                    code: ErrorKind::UnknownMetric.code(),
                },
            }),
            Pdu::InstanceReq { indom } => Some(Pdu::Instance {
                instances: InDomInstances::new(
                    indom,
                    Timestamp::new(1_700_000_000, 0),
                    vec![(0, "cpu0".into()), (1, "cpu1".into())],
                ),
            }),
            Pdu::Store { result, .. } => {
                log.lock().unwrap().stores.push(result);
                Some(Pdu::Error { code: 0 })
            }
            _ => Some(Pdu::Error {
                code: ErrorKind::ProtocolViolation.code(),
            }),
        };
        if let Some(reply) = reply {
            if conn.send(&reply).is_err() {
                break;
            }
        }
    }
}

fn log_desc_request<'a>(
    log: &Mutex<CollectorLog>,
    descs: &'a BTreeMap<Pmid, Desc>,
    pmid: Pmid,
) -> Option<&'a Desc> {
    log.lock().unwrap().desc_requests += 1;
    descs.get(&pmid)
}

/// Singular U64 instant descriptor for fake collectors.
pub(crate) fn u64_desc(pmid: Pmid) -> Desc {
    Desc {
        pmid,
        value_type: ValueType::U64,
        indom: InDom::NULL,
        semantics: Semantics::Instant,
        units: Units::NONE,
    }
}
