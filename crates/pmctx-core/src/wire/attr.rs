//! Connection attributes sent to a collector after connect.

use std::fmt;

use super::frame::{FrameReader, FrameWriter};
use crate::error::PmError;

/// Attribute payloads must be strictly shorter than this.
pub const MAX_ATTR_LEN: usize = 1024;

const MAX_CONTAINER_NAME: usize = 64;

/// Syntax check applied to container names received in an attribute frame.
pub type NameChecker = fn(&str) -> bool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrTag {
    UserName,
    ProcessId,
    Container,
    Other(u32),
}

impl AttrTag {
    pub fn code(self) -> u32 {
        match self {
            AttrTag::UserName => 5,
            AttrTag::ProcessId => 14,
            AttrTag::Container => 15,
            AttrTag::Other(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            5 => AttrTag::UserName,
            14 => AttrTag::ProcessId,
            15 => AttrTag::Container,
            other => AttrTag::Other(other),
        }
    }

    /// Maps a host-spec key (`?container=...`) to a tag.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "username" | "user" => Some(AttrTag::UserName),
            "container" => Some(AttrTag::Container),
            "pid" | "processid" => Some(AttrTag::ProcessId),
            _ => None,
        }
    }
}

impl fmt::Display for AttrTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrTag::UserName => f.write_str("username"),
            AttrTag::ProcessId => f.write_str("processid"),
            AttrTag::Container => f.write_str("container"),
            AttrTag::Other(code) => write!(f, "attr#{code}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub tag: AttrTag,
    pub value: Vec<u8>,
}

impl Attribute {
    pub fn new(tag: AttrTag, value: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    pub fn container(name: &str) -> Self {
        Self::new(AttrTag::Container, name.as_bytes())
    }

    pub fn process_id(pid: u32) -> Self {
        Self::new(AttrTag::ProcessId, pid.to_string().into_bytes())
    }

    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }

    pub(crate) fn encode(&self, w: &mut FrameWriter) -> Result<(), PmError> {
        if self.value.len() >= MAX_ATTR_LEN {
            return Err(PmError::new(
                crate::error::ErrorKind::InvalidArgument,
                format!(
                    "{} attribute of {} bytes exceeds limit",
                    self.tag,
                    self.value.len()
                ),
            ));
        }
        w.put_u32(self.tag.code());
        w.put_u32(self.value.len() as u32);
        w.put_padded(&self.value);
        Ok(())
    }

    /// Decodes one attribute. The declared length is checked against
    /// [`MAX_ATTR_LEN`] before anything is copied, and container names must
    /// pass `checker`.
    pub(crate) fn decode(r: &mut FrameReader<'_>, checker: NameChecker) -> Result<Self, PmError> {
        let tag = AttrTag::from_code(r.get_u32()?);
        let len = r.get_i32()?;
        if len < 0 || len as usize >= MAX_ATTR_LEN {
            return Err(PmError::protocol(format!(
                "{tag} attribute length {len} outside 0..{MAX_ATTR_LEN}"
            )));
        }
        let bytes = r.take_padded(len as usize)?;

        if tag == AttrTag::Container {
            let name = std::str::from_utf8(bytes)
                .map_err(|_| PmError::protocol("container name is not valid UTF-8"))?;
            if !checker(name) {
                return Err(PmError::protocol(format!(
                    "container name {name:?} rejected"
                )));
            }
        }

        Ok(Self {
            tag,
            value: bytes.to_vec(),
        })
    }
}

/// Default container-name syntax: 1 to 64 ASCII alphanumerics, `-`, `_` or
/// `.`, not starting with `-` or `.`.
pub fn valid_container_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    match bytes.first() {
        None => false,
        Some(b'-') | Some(b'.') => false,
        Some(_) => {
            bytes.len() <= MAX_CONTAINER_NAME
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        }
    }
}
