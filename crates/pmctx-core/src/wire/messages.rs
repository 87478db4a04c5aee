//! Typed frames and their payload encodings.
//!
//! Result bodies use a value-block shape per instance:
//! ```text
//! inst: i32 │ vtype:8 │ vlen:24 │ payload (vlen - 4 bytes, padded to 4)
//! ```
//! A value set whose count is negative carries a status code instead of
//! values.

use super::attr::{Attribute, NameChecker, valid_container_name};
use super::frame::{FrameReader, FrameType, FrameWriter, HEADER_LEN};
use crate::error::{ErrorKind, PmError};
use crate::model::profile::IndomProfile;
use crate::model::{
    Desc, FetchResult, InDom, InDomInstances, InstanceProfile, InstanceValue, Pmid, Semantics,
    Timestamp, Units, Value, ValueSet, ValueType,
};

const MAX_VLEN: usize = 0x00ff_ffff;

#[derive(Debug, Clone, PartialEq)]
pub enum Pdu {
    /// Status reply; 0 is success, negative is an error code.
    Error { code: i32 },
    Profile { ctx: u32, profile: InstanceProfile },
    Fetch { ctx: u32, pmids: Vec<Pmid>, hires: bool },
    Result { result: FetchResult, hires: bool },
    DescReq { pmid: Pmid },
    Desc { desc: Desc },
    InstanceReq { indom: InDom },
    Instance { instances: InDomInstances },
    Store { ctx: u32, result: FetchResult },
    Attr { attr: Attribute },
}

impl Pdu {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Pdu::Error { .. } => FrameType::Error,
            Pdu::Profile { .. } => FrameType::Profile,
            Pdu::Fetch { hires: false, .. } => FrameType::Fetch,
            Pdu::Fetch { hires: true, .. } => FrameType::HighResFetch,
            Pdu::Result { hires: false, .. } => FrameType::Result,
            Pdu::Result { hires: true, .. } => FrameType::HighResResult,
            Pdu::DescReq { .. } => FrameType::DescReq,
            Pdu::Desc { .. } => FrameType::Desc,
            Pdu::InstanceReq { .. } => FrameType::InstanceReq,
            Pdu::Instance { .. } => FrameType::Instance,
            Pdu::Store { .. } => FrameType::Store,
            Pdu::Attr { .. } => FrameType::Attr,
        }
    }

    pub fn encode(&self, from: u32) -> Result<Vec<u8>, PmError> {
        let mut w = FrameWriter::new(self.frame_type(), from);
        match self {
            Pdu::Error { code } => w.put_i32(*code),
            Pdu::Profile { ctx, profile } => {
                w.put_u32(*ctx);
                encode_profile(&mut w, profile);
            }
            Pdu::Fetch { ctx, pmids, .. } => {
                if pmids.is_empty() {
                    return Err(PmError::new(
                        ErrorKind::InvalidArgument,
                        "fetch needs at least one pmid",
                    ));
                }
                w.put_u32(*ctx);
                w.put_i32(pmids.len() as i32);
                for pmid in pmids {
                    w.put_u32(pmid.raw());
                }
            }
            Pdu::Result { result, hires } => encode_result(&mut w, result, *hires)?,
            Pdu::DescReq { pmid } => w.put_u32(pmid.raw()),
            Pdu::Desc { desc } => {
                w.put_u32(desc.pmid.raw());
                w.put_u32(desc.value_type.code() as u32);
                w.put_u32(desc.indom.raw());
                w.put_i32(desc.semantics.code());
                w.put_u32(desc.units.pack());
            }
            Pdu::InstanceReq { indom } => w.put_u32(indom.raw()),
            Pdu::Instance { instances } => {
                w.put_u32(instances.indom.raw());
                put_timestamp(&mut w, instances.timestamp, true)?;
                w.put_i32(instances.instances.len() as i32);
                for (inst, name) in &instances.instances {
                    w.put_i32(*inst);
                    w.put_u32(name.len() as u32);
                    w.put_padded(name.as_bytes());
                }
            }
            Pdu::Store { ctx, result } => {
                w.put_u32(*ctx);
                encode_result(&mut w, result, true)?;
            }
            Pdu::Attr { attr } => attr.encode(&mut w)?,
        }
        Ok(w.finish())
    }

    /// Decodes one complete frame with the default container-name check.
    pub fn decode(frame: &[u8]) -> Result<Pdu, PmError> {
        Self::decode_with(frame, valid_container_name)
    }

    pub fn decode_with(frame: &[u8], checker: NameChecker) -> Result<Pdu, PmError> {
        let mut r = FrameReader::new(frame)?;
        let pdu = match r.frame_type() {
            FrameType::Error => Pdu::Error { code: r.get_i32()? },
            FrameType::Profile => {
                let ctx = r.get_u32()?;
                let profile = decode_profile(&mut r)?;
                Pdu::Profile { ctx, profile }
            }
            FrameType::Fetch | FrameType::HighResFetch => decode_fetch(&mut r)?,
            FrameType::Result => Pdu::Result {
                result: decode_result(&mut r, false)?,
                hires: false,
            },
            FrameType::HighResResult => Pdu::Result {
                result: decode_result(&mut r, true)?,
                hires: true,
            },
            FrameType::DescReq => Pdu::DescReq {
                pmid: Pmid::from_raw(r.get_u32()?),
            },
            FrameType::Desc => Pdu::Desc {
                desc: decode_desc(&mut r)?,
            },
            FrameType::InstanceReq => Pdu::InstanceReq {
                indom: InDom::from_raw(r.get_u32()?),
            },
            FrameType::Instance => Pdu::Instance {
                instances: decode_instances(&mut r)?,
            },
            FrameType::Store => {
                let ctx = r.get_u32()?;
                let result = decode_result(&mut r, true)?;
                Pdu::Store { ctx, result }
            }
            FrameType::Attr => Pdu::Attr {
                attr: Attribute::decode(&mut r, checker)?,
            },
        };
        r.finish()?;
        Ok(pdu)
    }
}

fn decode_fetch(r: &mut FrameReader<'_>) -> Result<Pdu, PmError> {
    let hires = r.frame_type() == FrameType::HighResFetch;
    let ctx = r.get_u32()?;
    let numpmid = r.get_i32()?;
    if numpmid <= 0 {
        return Err(PmError::protocol(format!(
            "fetch frame with numpmid {numpmid}"
        )));
    }
    let expected = (numpmid as usize)
        .checked_mul(4)
        .and_then(|n| n.checked_add(HEADER_LEN + 8));
    if expected != Some(r.declared_len()) {
        return Err(PmError::protocol(format!(
            "fetch frame declares {numpmid} pmids but is {} bytes long",
            r.declared_len()
        )));
    }
    let mut pmids = Vec::with_capacity(numpmid as usize);
    for _ in 0..numpmid {
        pmids.push(Pmid::from_raw(r.get_u32()?));
    }
    Ok(Pdu::Fetch { ctx, pmids, hires })
}

fn put_timestamp(w: &mut FrameWriter, ts: Timestamp, hires: bool) -> Result<(), PmError> {
    if hires {
        w.put_i64(ts.sec);
        w.put_u32(ts.nsec);
    } else {
        let sec = i32::try_from(ts.sec).map_err(|_| {
            PmError::new(
                ErrorKind::InvalidArgument,
                format!("timestamp {} does not fit a 32-bit seconds field", ts.sec),
            )
        })?;
        w.put_i32(sec);
        w.put_i32((ts.nsec / 1000) as i32);
    }
    Ok(())
}

fn get_timestamp(r: &mut FrameReader<'_>, hires: bool) -> Result<Timestamp, PmError> {
    if hires {
        let sec = r.get_i64()?;
        let nsec = r.get_u32()?;
        if nsec >= 1_000_000_000 {
            return Err(PmError::protocol(format!("nanoseconds field {nsec}")));
        }
        Ok(Timestamp { sec, nsec })
    } else {
        let sec = r.get_i32()?;
        let usec = r.get_i32()?;
        if !(0..1_000_000).contains(&usec) {
            return Err(PmError::protocol(format!("microseconds field {usec}")));
        }
        Ok(Timestamp {
            sec: sec as i64,
            nsec: usec as u32 * 1000,
        })
    }
}

fn encode_result(w: &mut FrameWriter, result: &FetchResult, hires: bool) -> Result<(), PmError> {
    put_timestamp(w, result.timestamp, hires)?;
    w.put_i32(result.vsets.len() as i32);
    for vs in &result.vsets {
        w.put_u32(vs.pmid.raw());
        match &vs.values {
            Err(kind) => w.put_i32(kind.code()),
            Ok(values) => {
                w.put_i32(values.len() as i32);
                for iv in values {
                    encode_value(w, iv)?;
                }
            }
        }
    }
    Ok(())
}

fn encode_value(w: &mut FrameWriter, iv: &InstanceValue) -> Result<(), PmError> {
    let payload: Vec<u8> = match &iv.value {
        Value::I32(v) => v.to_be_bytes().to_vec(),
        Value::U32(v) => v.to_be_bytes().to_vec(),
        Value::I64(v) => v.to_be_bytes().to_vec(),
        Value::U64(v) => v.to_be_bytes().to_vec(),
        Value::Float(v) => v.to_bits().to_be_bytes().to_vec(),
        Value::Double(v) => v.to_bits().to_be_bytes().to_vec(),
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Aggregate(b) | Value::Event(b) => b.clone(),
    };
    let vlen = payload.len() + 4;
    if vlen > MAX_VLEN {
        return Err(PmError::new(
            ErrorKind::InvalidArgument,
            format!("value of {} bytes too large for a value block", payload.len()),
        ));
    }
    w.put_i32(iv.inst);
    w.put_u32(((iv.value.value_type().code() as u32) << 24) | vlen as u32);
    w.put_padded(&payload);
    Ok(())
}

fn decode_result(r: &mut FrameReader<'_>, hires: bool) -> Result<FetchResult, PmError> {
    let timestamp = get_timestamp(r, hires)?;
    let numpmid = r.get_count("pmid", 8)?;
    let mut vsets = Vec::with_capacity(numpmid);
    for _ in 0..numpmid {
        let pmid = Pmid::from_raw(r.get_u32()?);
        let numval = r.get_i32()?;
        if numval < 0 {
            vsets.push(ValueSet::error(pmid, ErrorKind::from_code(numval)));
            continue;
        }
        let numval = numval as usize;
        if numval.saturating_mul(8) > r.remaining() {
            return Err(PmError::protocol(format!(
                "pmid {pmid} claims {numval} values, {} bytes left",
                r.remaining()
            )));
        }
        let mut values = Vec::with_capacity(numval);
        for _ in 0..numval {
            values.push(decode_value(r)?);
        }
        vsets.push(ValueSet::new(pmid, values));
    }
    Ok(FetchResult { timestamp, vsets })
}

fn decode_value(r: &mut FrameReader<'_>) -> Result<InstanceValue, PmError> {
    let inst = r.get_i32()?;
    let header = r.get_u32()?;
    let code = (header >> 24) as u8;
    let vlen = (header & MAX_VLEN as u32) as usize;
    if vlen < 4 {
        return Err(PmError::protocol(format!("value block length {vlen}")));
    }
    let vtype = ValueType::from_code(code)
        .ok_or_else(|| PmError::protocol(format!("unknown value type {code}")))?;
    let payload = r.take_padded(vlen - 4)?;
    if vtype.fixed_len().is_some_and(|fixed| fixed != payload.len()) {
        return Err(PmError::protocol(format!(
            "{vtype} value with {} payload bytes",
            payload.len()
        )));
    }

    let be4 = || [payload[0], payload[1], payload[2], payload[3]];
    let be8 = || {
        let mut b = [0u8; 8];
        b.copy_from_slice(&payload[..8]);
        b
    };
    let value = match vtype {
        ValueType::I32 => Value::I32(i32::from_be_bytes(be4())),
        ValueType::U32 => Value::U32(u32::from_be_bytes(be4())),
        ValueType::I64 => Value::I64(i64::from_be_bytes(be8())),
        ValueType::U64 => Value::U64(u64::from_be_bytes(be8())),
        ValueType::Float => Value::Float(f32::from_bits(u32::from_be_bytes(be4()))),
        ValueType::Double => Value::Double(f64::from_bits(u64::from_be_bytes(be8()))),
        ValueType::String => Value::String(
            String::from_utf8(payload.to_vec())
                .map_err(|_| PmError::protocol("string value is not valid UTF-8"))?,
        ),
        ValueType::Aggregate => Value::Aggregate(payload.to_vec()),
        ValueType::Event => Value::Event(payload.to_vec()),
    };
    Ok(InstanceValue { inst, value })
}

fn decode_desc(r: &mut FrameReader<'_>) -> Result<Desc, PmError> {
    let pmid = Pmid::from_raw(r.get_u32()?);
    let type_code = r.get_u32()?;
    let value_type = u8::try_from(type_code)
        .ok()
        .and_then(ValueType::from_code)
        .ok_or_else(|| PmError::protocol(format!("unknown value type {type_code}")))?;
    let indom = InDom::from_raw(r.get_u32()?);
    let sem = r.get_i32()?;
    let semantics = Semantics::from_code(sem)
        .ok_or_else(|| PmError::protocol(format!("unknown semantics {sem}")))?;
    let units = Units::unpack(r.get_u32()?);
    Ok(Desc {
        pmid,
        value_type,
        indom,
        semantics,
        units,
    })
}

fn encode_profile(w: &mut FrameWriter, profile: &InstanceProfile) {
    w.put_u32(profile.include_all() as u32);
    let entries: Vec<_> = profile.entries().collect();
    w.put_i32(entries.len() as i32);
    for (indom, p) in entries {
        w.put_u32(indom.raw());
        w.put_u32(p.include as u32);
        w.put_i32(p.instances.len() as i32);
        for inst in &p.instances {
            w.put_i32(*inst);
        }
    }
}

fn decode_profile(r: &mut FrameReader<'_>) -> Result<InstanceProfile, PmError> {
    let include_all = r.get_u32()? != 0;
    let count = r.get_count("profile", 12)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let indom = InDom::from_raw(r.get_u32()?);
        let include = r.get_u32()? != 0;
        let numinst = r.get_count("instance", 4)?;
        let mut instances = Vec::with_capacity(numinst);
        for _ in 0..numinst {
            instances.push(r.get_i32()?);
        }
        entries.push((indom, IndomProfile { include, instances }));
    }
    Ok(InstanceProfile::from_parts(include_all, entries))
}

fn decode_instances(r: &mut FrameReader<'_>) -> Result<InDomInstances, PmError> {
    let indom = InDom::from_raw(r.get_u32()?);
    let timestamp = get_timestamp(r, true)?;
    let count = r.get_count("instance", 8)?;
    let mut instances = Vec::with_capacity(count);
    for _ in 0..count {
        let inst = r.get_i32()?;
        let len = r.get_u32()? as usize;
        let name = std::str::from_utf8(r.take_padded(len)?)
            .map_err(|_| PmError::protocol("instance name is not valid UTF-8"))?;
        instances.push((inst, name.to_string()));
    }
    Ok(InDomInstances {
        indom,
        timestamp,
        instances,
    })
}
