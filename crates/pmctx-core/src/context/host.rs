//! Host back end: one collector connection per context.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::table::ContextHandle;
use crate::config::ClientConfig;
use crate::error::{ErrorKind, PmError};
use crate::model::{Desc, FetchResult, InDom, InDomInstances, InstanceProfile, Pmid};
use crate::wire::{Connection, HostSpec, Pdu};

pub(crate) struct HostBackend {
    spec: HostSpec,
    config: ClientConfig,
    handle: ContextHandle,
    conn: Option<Connection>,
    /// Profile generation the collector holds for this connection.
    profile_sent: Option<u64>,
    /// Failed reconnect attempts since the last good connection.
    failures: usize,
    last_failure: Option<Instant>,
}

impl HostBackend {
    pub(crate) fn connect(spec: HostSpec, config: ClientConfig) -> Result<Self, PmError> {
        let conn = dial(&spec, &config, 0)?;
        Ok(Self {
            spec,
            config,
            handle: ContextHandle::from_raw(0),
            conn: Some(conn),
            profile_sent: None,
            failures: 0,
            last_failure: None,
        })
    }

    /// Records the handle this back end serves; it is stamped into frames.
    pub(crate) fn bind(&mut self, handle: ContextHandle) {
        self.handle = handle;
        if let Some(conn) = self.conn.as_mut() {
            conn.set_from(handle.raw());
        }
    }

    pub(crate) fn host(&self) -> &str {
        &self.spec.host
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Opens a second, independent connection to the same collector.
    pub(crate) fn duplicate(&self) -> Result<Self, PmError> {
        Self::connect(self.spec.clone(), self.config.clone())
    }

    pub(crate) fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
        self.profile_sent = None;
    }

    /// Re-dials the collector. Attempts made before the backoff delay for
    /// the current failure count has passed fail with `Timeout` without
    /// touching the network.
    pub(crate) fn reconnect(&mut self) -> Result<(), PmError> {
        if let Some(last) = self.last_failure {
            let wait = self.config.backoff_for(self.failures.saturating_sub(1));
            if last.elapsed() < wait {
                return Err(PmError::new(
                    ErrorKind::Timeout,
                    format!(
                        "reconnect to {} too soon, next attempt in {:.1}s",
                        self.spec,
                        (wait - last.elapsed()).as_secs_f64()
                    ),
                ));
            }
        }

        self.close();
        match dial(&self.spec, &self.config, self.handle.raw()) {
            Ok(conn) => {
                self.conn = Some(conn);
                self.failures = 0;
                self.last_failure = None;
                info!(handle = %self.handle, host = %self.spec, "reconnected");
                Ok(())
            }
            Err(e) => {
                self.failures += 1;
                self.last_failure = Some(Instant::now());
                warn!(
                    handle = %self.handle,
                    host = %self.spec,
                    attempt = self.failures,
                    error = %e,
                    "reconnect failed"
                );
                Err(e)
            }
        }
    }

    fn conn(&mut self) -> Result<&mut Connection, PmError> {
        let spec = &self.spec;
        self.conn.as_mut().ok_or_else(|| {
            PmError::new(
                ErrorKind::ConnectionFailed,
                format!("not connected to {spec}, reconnect required"),
            )
        })
    }

    /// A failure that leaves the stream in an unknown state closes it.
    fn check<T>(&mut self, outcome: Result<T, PmError>) -> Result<T, PmError> {
        if let Err(e) = &outcome {
            if matches!(
                e.kind(),
                ErrorKind::Timeout
                    | ErrorKind::ProtocolViolation
                    | ErrorKind::ConnectionFailed
                    | ErrorKind::Io
            ) {
                warn!(handle = %self.handle, host = %self.spec, error = %e, "dropping connection");
                self.close();
            }
        }
        outcome
    }

    fn call(&mut self, pdu: &Pdu) -> Result<Pdu, PmError> {
        let timeout = Some(self.config.request_timeout);
        let outcome = self.conn().and_then(|conn| conn.request(pdu, timeout));
        self.check(outcome)
    }

    fn ensure_profile(&mut self, profile: &InstanceProfile) -> Result<(), PmError> {
        if self.profile_sent == Some(profile.generation()) {
            return Ok(());
        }
        let pdu = Pdu::Profile {
            ctx: self.handle.raw(),
            profile: profile.clone(),
        };
        let outcome = self.conn().and_then(|conn| conn.send(&pdu));
        self.check(outcome)?;
        self.profile_sent = Some(profile.generation());
        debug!(handle = %self.handle, generation = profile.generation(), "profile sent");
        Ok(())
    }

    pub(crate) fn lookup_desc(&mut self, pmid: Pmid) -> Result<Desc, PmError> {
        match self.call(&Pdu::DescReq { pmid })? {
            Pdu::Desc { desc } if desc.pmid == pmid => Ok(desc),
            reply => self.unexpected(reply, "descriptor"),
        }
    }

    pub(crate) fn fetch(
        &mut self,
        profile: &InstanceProfile,
        pmids: &[Pmid],
    ) -> Result<FetchResult, PmError> {
        self.ensure_profile(profile)?;
        let request = Pdu::Fetch {
            ctx: self.handle.raw(),
            pmids: pmids.to_vec(),
            hires: self.config.hires_fetch,
        };
        match self.call(&request)? {
            Pdu::Result { result, .. } => {
                if result.vsets.len() != pmids.len() {
                    let err = PmError::protocol(format!(
                        "asked for {} metrics, collector answered {}",
                        pmids.len(),
                        result.vsets.len()
                    ));
                    return self.check(Err(err));
                }
                Ok(result)
            }
            reply => self.unexpected(reply, "result"),
        }
    }

    pub(crate) fn get_indom(&mut self, indom: InDom) -> Result<InDomInstances, PmError> {
        match self.call(&Pdu::InstanceReq { indom })? {
            Pdu::Instance { instances } if instances.indom == indom => Ok(instances),
            reply => self.unexpected(reply, "instance list"),
        }
    }

    pub(crate) fn store(&mut self, result: &FetchResult) -> Result<(), PmError> {
        let request = Pdu::Store {
            ctx: self.handle.raw(),
            result: result.clone(),
        };
        match self.call(&request)? {
            Pdu::Error { code: 0 } => Ok(()),
            reply => self.unexpected(reply, "store status"),
        }
    }

    /// Error frames pass their code through; anything else is a protocol
    /// violation.
    fn unexpected<T>(&mut self, reply: Pdu, wanted: &str) -> Result<T, PmError> {
        match reply {
            Pdu::Error { code } if code < 0 => Err(PmError::from_code(code)),
            other => {
                let err = PmError::protocol(format!(
                    "expected {wanted}, got {:?} frame",
                    other.frame_type()
                ));
                self.check(Err(err))
            }
        }
    }
}

fn dial(spec: &HostSpec, config: &ClientConfig, from: u32) -> Result<Connection, PmError> {
    let port = spec.port_or(config.default_port);
    let addrs = (spec.host.as_str(), port).to_socket_addrs().map_err(|e| {
        PmError::new(
            ErrorKind::ConnectionFailed,
            format!("cannot resolve {}: {e}", spec.host),
        )
    })?;

    let mut last_err = None;
    let mut stream = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.connect_timeout) {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(e) => last_err = Some(e),
        }
    }
    let stream = stream.ok_or_else(|| {
        let why = last_err.map_or_else(|| "no addresses".to_string(), |e| e.to_string());
        PmError::new(
            ErrorKind::ConnectionFailed,
            format!("connect to {}:{port}: {why}", spec.host),
        )
    })?;
    stream.set_nodelay(true)?;

    let mut conn = Connection::new(stream, config.max_frame_len, from);
    for attr in &spec.attrs {
        let reply = conn.request(&Pdu::Attr { attr: attr.clone() }, Some(config.request_timeout))?;
        match reply {
            Pdu::Error { code: 0 } => {}
            Pdu::Error { code } => return Err(PmError::from_code(code)),
            other => {
                return Err(PmError::protocol(format!(
                    "expected attribute status, got {:?} frame",
                    other.frame_type()
                )));
            }
        }
    }
    debug!(host = %spec.host, port, attrs = spec.attrs.len(), "connected to collector");
    Ok(conn)
}
