use std::fmt;
use std::str::FromStr;

use super::attr::{AttrTag, Attribute};
use crate::error::{ErrorKind, PmError};

/// Parsed `host[:port][?attr=value[&attr=value]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    pub host: String,
    pub port: Option<u16>,
    pub attrs: Vec<Attribute>,
}

impl HostSpec {
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

impl FromStr for HostSpec {
    type Err = PmError;

    fn from_str(s: &str) -> Result<Self, PmError> {
        let bad = |why: &str| PmError::new(ErrorKind::InvalidArgument, format!("host spec {s:?}: {why}"));

        let (target, query) = match s.split_once('?') {
            Some((t, q)) => (t, Some(q)),
            None => (s, None),
        };

        // [v6addr]:port, host:port, or bare host
        let (host, port) = if let Some(rest) = target.strip_prefix('[') {
            let (addr, tail) = rest.split_once(']').ok_or_else(|| bad("unclosed '['"))?;
            let port = match tail.strip_prefix(':') {
                Some(p) => Some(p.parse::<u16>().map_err(|_| bad("bad port"))?),
                None if tail.is_empty() => None,
                None => return Err(bad("junk after address")),
            };
            (addr.to_string(), port)
        } else {
            match target.rsplit_once(':') {
                Some((h, p)) if !h.contains(':') => {
                    (h.to_string(), Some(p.parse::<u16>().map_err(|_| bad("bad port"))?))
                }
                _ => (target.to_string(), None),
            }
        };
        if host.is_empty() {
            return Err(bad("empty host"));
        }

        let mut attrs = Vec::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                let tag = AttrTag::from_key(key).ok_or_else(|| bad("unknown attribute"))?;
                attrs.push(Attribute::new(tag, value.as_bytes()));
            }
        }

        Ok(HostSpec { host, port, attrs })
    }
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        for (i, attr) in self.attrs.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{}={}", attr.tag, String::from_utf8_lossy(&attr.value))?;
        }
        Ok(())
    }
}
