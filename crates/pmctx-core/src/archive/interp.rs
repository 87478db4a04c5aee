//! Interpolated replay: values synthesized at an arbitrary time.
//!
//! For every requested metric the nearest record at or before the target
//! supplies the instance set and the prior values. Each of those instances
//! then needs its own nearest following value, which may sit in a later
//! record than another instance's. Marks bound both searches.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use super::reader::ArchiveReader;
use crate::error::{ErrorKind, PmError};
use crate::model::{
    Desc, FetchResult, InstanceProfile, InstanceValue, Pmid, Semantics, Timestamp, Value,
    ValueSet,
};

struct Track {
    desc: Result<Desc, ErrorKind>,
    /// Nearest sample at or before the target; an error sample ends the
    /// search and its status is reported.
    prior: Option<(Timestamp, Result<Vec<InstanceValue>, ErrorKind>)>,
    next: HashMap<i32, (Timestamp, Value)>,
}

pub fn interpolate(
    reader: &mut ArchiveReader,
    pmids: &[Pmid],
    t: Timestamp,
    profile: &InstanceProfile,
) -> Result<FetchResult, PmError> {
    let Some((first, last)) = reader.time_bounds() else {
        return Err(PmError::new(ErrorKind::EndOfLog, "archive has no results"));
    };
    if t < first || t > last {
        return Err(PmError::new(
            ErrorKind::EndOfLog,
            format!("{t} outside archive span {first} .. {last}"),
        ));
    }

    let mut tracks: HashMap<Pmid, Track> = HashMap::new();
    for &pmid in pmids {
        if tracks.contains_key(&pmid) {
            continue;
        }
        let desc = match reader.desc(pmid) {
            Ok(desc) => Ok(desc),
            Err(e) if e.kind() == ErrorKind::UnknownMetric => Err(e.kind()),
            Err(e) => return Err(e),
        };
        tracks.insert(
            pmid,
            Track {
                desc,
                prior: None,
                next: HashMap::new(),
            },
        );
    }

    find_priors(reader, &mut tracks, t, profile)?;
    find_nexts(reader, &mut tracks, t)?;

    let vsets = pmids
        .iter()
        .map(|pmid| match tracks.get(pmid) {
            Some(track) => build_value_set(*pmid, track, t),
            None => ValueSet::empty(*pmid),
        })
        .collect();
    Ok(FetchResult {
        timestamp: t,
        vsets,
    })
}

/// Backward scan from `t`: the first record holding a metric fixes its
/// instance set.
fn find_priors(
    reader: &mut ArchiveReader,
    tracks: &mut HashMap<Pmid, Track>,
    t: Timestamp,
    profile: &InstanceProfile,
) -> Result<(), PmError> {
    let mut pending = tracks.values().filter(|tr| tr.desc.is_ok()).count();
    let mut end = reader.seek_backward(t)?;

    while pending > 0 {
        let Some(rec) = reader.prev_result_ref(end)? else {
            break;
        };
        let stored = reader.result_at(&rec)?;
        if stored.is_mark() {
            trace!(at = %rec.timestamp, "interpolation stopped at mark");
            break;
        }
        for (pmid, track) in tracks.iter_mut() {
            let Ok(desc) = track.desc else { continue };
            if track.prior.is_some() {
                continue;
            }
            let Some(vs) = stored.get(*pmid) else { continue };
            let values = if vs.status < 0 {
                Err(ErrorKind::from_code(vs.status))
            } else {
                Ok(vs
                    .values
                    .iter()
                    .filter(|iv| profile.is_included(desc.indom, iv.inst))
                    .cloned()
                    .collect())
            };
            track.prior = Some((rec.timestamp, values));
            pending -= 1;
        }
        end = rec.start;
    }
    Ok(())
}

fn needs_next(track: &Track, t: Timestamp) -> bool {
    let (Ok(desc), Some((prior_ts, Ok(_)))) = (&track.desc, &track.prior) else {
        return false;
    };
    *prior_ts != t
        && desc.semantics != Semantics::Discrete
        && !(desc.semantics == Semantics::Counter && !desc.value_type.is_arithmetic())
}

/// Forward scan from `t`, instance by instance.
fn find_nexts(
    reader: &mut ArchiveReader,
    tracks: &mut HashMap<Pmid, Track>,
    t: Timestamp,
) -> Result<(), PmError> {
    let mut wanted: HashSet<(Pmid, i32)> = HashSet::new();
    for (pmid, track) in tracks.iter() {
        if !needs_next(track, t) {
            continue;
        }
        if let Some((_, Ok(values))) = &track.prior {
            wanted.extend(values.iter().map(|iv| (*pmid, iv.inst)));
        }
    }

    let mut offset = reader.seek_forward(t)?;
    while !wanted.is_empty() {
        let Some(rec) = reader.next_result_ref(offset)? else {
            break;
        };
        let stored = reader.result_at(&rec)?;
        if stored.is_mark() {
            trace!(at = %rec.timestamp, "interpolation stopped at mark");
            break;
        }
        for vs in &stored.vsets {
            if vs.status < 0 {
                // no blending across an error sample
                wanted.retain(|(pmid, _)| *pmid != vs.pmid);
                continue;
            }
            let Some(track) = tracks.get_mut(&vs.pmid) else {
                continue;
            };
            for iv in &vs.values {
                if wanted.remove(&(vs.pmid, iv.inst)) {
                    track.next.insert(iv.inst, (rec.timestamp, iv.value.clone()));
                }
            }
        }
        offset = rec.end;
    }
    Ok(())
}

fn build_value_set(pmid: Pmid, track: &Track, t: Timestamp) -> ValueSet {
    let desc = match track.desc {
        Ok(desc) => desc,
        Err(kind) => return ValueSet::error(pmid, kind),
    };
    let (prior_ts, prior) = match &track.prior {
        None => return ValueSet::empty(pmid),
        Some((_, Err(kind))) => return ValueSet::error(pmid, *kind),
        Some((ts, Ok(values))) => (ts, values),
    };
    let arithmetic = desc.value_type.is_arithmetic();
    if desc.semantics == Semantics::Counter && !arithmetic {
        return ValueSet::error(pmid, ErrorKind::BadType);
    }

    let mut values = Vec::with_capacity(prior.len());
    for iv in prior {
        if *prior_ts == t || desc.semantics == Semantics::Discrete {
            values.push(iv.clone());
            continue;
        }
        let next = track.next.get(&iv.inst);
        if !arithmetic {
            // nearest stored value, ties to the prior
            let take_next = next.is_some_and(|(next_ts, _)| {
                next_ts.as_nanos() - t.as_nanos() < t.as_nanos() - prior_ts.as_nanos()
            });
            match next {
                Some((_, value)) if take_next => {
                    values.push(InstanceValue::new(iv.inst, value.clone()))
                }
                _ => values.push(iv.clone()),
            }
            continue;
        }
        let Some((next_ts, next_value)) = next else {
            continue;
        };
        if let Some(value) = blend(
            *prior_ts,
            &iv.value,
            *next_ts,
            next_value,
            t,
            desc.semantics,
        ) {
            values.push(InstanceValue::new(iv.inst, value));
        }
    }
    ValueSet::new(pmid, values)
}

/// Linear blend of two samples. `None` when the pair cannot be blended
/// (type change, counter wrap).
fn blend(
    prior_ts: Timestamp,
    prior: &Value,
    next_ts: Timestamp,
    next: &Value,
    t: Timestamp,
    semantics: Semantics,
) -> Option<Value> {
    let span = next_ts.as_nanos() - prior_ts.as_nanos();
    let elapsed = t.as_nanos() - prior_ts.as_nanos();
    if span <= 0 {
        return Some(prior.clone());
    }

    match (prior, next) {
        (Value::Float(a), Value::Float(b)) => {
            let frac = elapsed as f64 / span as f64;
            Some(Value::Float((*a as f64 + (*b as f64 - *a as f64) * frac) as f32))
        }
        (Value::Double(a), Value::Double(b)) => {
            let frac = elapsed as f64 / span as f64;
            Some(Value::Double(a + (b - a) * frac))
        }
        _ => {
            if prior.value_type() != next.value_type() {
                return None;
            }
            let a = prior.as_i128()?;
            let b = next.as_i128()?;
            if semantics == Semantics::Counter && b < a {
                return None;
            }
            let v = a + scaled_delta(b - a, elapsed, span);
            match prior {
                Value::I32(_) => i32::try_from(v).ok().map(Value::I32),
                Value::U32(_) => u32::try_from(v).ok().map(Value::U32),
                Value::I64(_) => i64::try_from(v).ok().map(Value::I64),
                Value::U64(_) => u64::try_from(v).ok().map(Value::U64),
                _ => None,
            }
        }
    }
}

/// `delta * elapsed / span` rounded half up, exact when it fits in i128.
fn scaled_delta(delta: i128, elapsed: i128, span: i128) -> i128 {
    let exact = delta
        .checked_mul(elapsed)
        .and_then(|num| num.checked_mul(2))
        .and_then(|num2| num2.checked_add(span))
        .map(|num2| num2.div_euclid(2 * span));
    match exact {
        Some(v) => v,
        None => (delta as f64 * (elapsed as f64 / span as f64) + 0.5).floor() as i128,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::testdata::*;
    use crate::archive::writer::{ArchiveWriter, WriterOptions};
    use crate::model::{IN_NULL, InDom, Units, ValueType};
    use tempfile::tempdir;

    fn open_sample() -> (tempfile::TempDir, ArchiveReader) {
        let dir = tempdir().unwrap();
        let base = build_sample_archive(dir.path(), WriterOptions::default());
        let reader = ArchiveReader::open(base).unwrap();
        (dir, reader)
    }

    fn at(reader: &mut ArchiveReader, pmids: &[Pmid], secs: i64, nsec: u32) -> FetchResult {
        interpolate(
            reader,
            pmids,
            Timestamp::new(secs, nsec),
            &InstanceProfile::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_linear_two_samples() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("linear");
        let pmid = Pmid::new(5, 0, 0);
        let mut w = ArchiveWriter::create(&base, "h", "UTC", Timestamp::ZERO).unwrap();
        w.write_desc(&Desc {
            pmid,
            value_type: ValueType::I64,
            indom: InDom::NULL,
            semantics: Semantics::Instant,
            units: Units::NONE,
        })
        .unwrap();
        for (secs, v) in [(0, 10), (10, 20)] {
            w.write_result(&FetchResult::new(
                Timestamp::from_secs(secs),
                vec![ValueSet::new(
                    pmid,
                    vec![InstanceValue::new(IN_NULL, Value::I64(v))],
                )],
            ))
            .unwrap();
        }
        w.finish().unwrap();
        let mut reader = ArchiveReader::open(&base).unwrap();

        for (secs, expected) in [(5, 15), (0, 10), (10, 20)] {
            let result = at(&mut reader, &[pmid], secs, 0);
            assert_eq!(
                result.vsets[0].value_of(IN_NULL),
                Some(&Value::I64(expected)),
                "t={secs}"
            );
        }
    }

    #[test]
    fn test_exact_hit_returns_stored_value() {
        let (_dir, mut reader) = open_sample();
        let result = at(&mut reader, &[PMID_COUNT, PMID_LOAD], 110, 0);
        assert_eq!(result.timestamp, Timestamp::from_secs(110));
        assert_eq!(result.vsets[0].value_of(IN_NULL), Some(&Value::U64(2000)));
        // load is not logged at 110, so it is blended from 100 and 120
        assert_eq!(result.vsets[1].value_of(IN_NULL), Some(&Value::Double(2.0)));
    }

    #[test]
    fn test_counter_blend() {
        let (_dir, mut reader) = open_sample();
        let result = at(&mut reader, &[PMID_COUNT], 105, 0);
        assert_eq!(result.vsets[0].value_of(IN_NULL), Some(&Value::U64(1500)));
    }

    #[test]
    fn test_per_instance_blend_rounds_half_up() {
        let (_dir, mut reader) = open_sample();
        let result = at(&mut reader, &[PMID_DISK], 135, 0);
        let vs = &result.vsets[0];
        assert_eq!(vs.value_of(0), Some(&Value::U32(45)));
        assert_eq!(vs.value_of(1), Some(&Value::U32(90)));
        assert_eq!(vs.value_of(2), Some(&Value::U32(8)));

        // instance 2 does not exist yet in the prior record
        let result = at(&mut reader, &[PMID_DISK], 125, 0);
        let vs = &result.vsets[0];
        assert_eq!(vs.value_of(0), Some(&Value::U32(35)));
        assert_eq!(vs.value_of(1), Some(&Value::U32(70)));
        assert_eq!(vs.value_of(2), None);
    }

    #[test]
    fn test_profile_limits_instances() {
        let (_dir, mut reader) = open_sample();
        let mut profile = InstanceProfile::new();
        profile.delete(DISK_INDOM, &[1]);
        let result =
            interpolate(&mut reader, &[PMID_DISK], Timestamp::from_secs(135), &profile).unwrap();
        let vs = &result.vsets[0];
        assert!(vs.value_of(0).is_some());
        assert!(vs.value_of(1).is_none());
        assert!(vs.value_of(2).is_some());
    }

    #[test]
    fn test_strings_take_nearest_value() {
        let (_dir, mut reader) = open_sample();
        let name = |r: &FetchResult| r.vsets[0].value_of(IN_NULL).cloned();
        assert_eq!(
            name(&at(&mut reader, &[PMID_NAME], 110, 0)),
            Some(Value::String("alpha".into()))
        );
        assert_eq!(
            name(&at(&mut reader, &[PMID_NAME], 120, 0)),
            Some(Value::String("beta".into()))
        );
        assert_eq!(
            name(&at(&mut reader, &[PMID_NAME], 115, 0)),
            Some(Value::String("alpha".into()))
        );
    }

    #[test]
    fn test_discrete_holds_prior() {
        let (_dir, mut reader) = open_sample();
        let result = at(&mut reader, &[PMID_STATE], 119, 999_999_999);
        assert_eq!(result.vsets[0].value_of(IN_NULL), Some(&Value::I32(1)));
        let result = at(&mut reader, &[PMID_STATE], 120, 0);
        assert_eq!(result.vsets[0].value_of(IN_NULL), Some(&Value::I32(5)));
    }

    #[test]
    fn test_per_metric_errors() {
        let (_dir, mut reader) = open_sample();
        let unknown = Pmid::new(9, 9, 9);
        let result = at(&mut reader, &[unknown, PMID_BAD_COUNTER, PMID_COUNT], 105, 0);
        assert_eq!(result.vsets[0].values, Err(ErrorKind::UnknownMetric));
        assert_eq!(result.vsets[1].values, Err(ErrorKind::BadType));
        assert!(!result.vsets[2].is_error());
    }

    #[test]
    fn test_outside_span_is_end_of_log() {
        let (_dir, mut reader) = open_sample();
        for secs in [99, 141] {
            let err = interpolate(
                &mut reader,
                &[PMID_COUNT],
                Timestamp::from_secs(secs),
                &InstanceProfile::new(),
            )
            .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::EndOfLog);
        }
    }

    #[test]
    fn test_marks_stop_blending() {
        let dir = tempdir().unwrap();
        let base = build_marked_archive(dir.path());
        let mut reader = ArchiveReader::open(&base).unwrap();

        // prior search hits the mark at 5
        let result = at(&mut reader, &[PMID_COUNT], 7, 0);
        assert_eq!(result.vsets[0].values, Ok(vec![]));
        // next search hits the mark at 5
        let result = at(&mut reader, &[PMID_COUNT], 3, 0);
        assert_eq!(result.vsets[0].values, Ok(vec![]));
        // after the mark blending works again
        let result = at(&mut reader, &[PMID_COUNT], 15, 0);
        assert_eq!(result.vsets[0].value_of(IN_NULL), Some(&Value::I64(25)));
    }

    #[test]
    fn test_error_sample_is_not_blended_across() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("errors");
        let t = Timestamp::from_secs;
        let mut w = ArchiveWriter::create(&base, "h", "UTC", t(0)).unwrap();
        w.write_desc(&Desc {
            pmid: PMID_COUNT,
            value_type: ValueType::I64,
            indom: InDom::NULL,
            semantics: Semantics::Instant,
            units: Units::count(),
        })
        .unwrap();
        let sample = |secs, v| {
            let values = vec![InstanceValue::new(IN_NULL, Value::I64(v))];
            FetchResult::new(t(secs), vec![ValueSet::new(PMID_COUNT, values)])
        };
        w.write_result(&sample(0, 10)).unwrap();
        w.write_result(&FetchResult::new(
            t(5),
            vec![ValueSet::error(PMID_COUNT, ErrorKind::UnknownAgent)],
        ))
        .unwrap();
        w.write_result(&sample(10, 30)).unwrap();
        let base = w.finish().unwrap();
        let mut reader = ArchiveReader::open(&base).unwrap();

        // prior is the error sample at 5
        let result = at(&mut reader, &[PMID_COUNT], 7, 0);
        assert_eq!(result.vsets[0].values, Err(ErrorKind::UnknownAgent));
        // next search stops at the error sample at 5
        let result = at(&mut reader, &[PMID_COUNT], 3, 0);
        assert_eq!(result.vsets[0].values, Ok(vec![]));
        let result = at(&mut reader, &[PMID_COUNT], 0, 0);
        assert_eq!(result.vsets[0].value_of(IN_NULL), Some(&Value::I64(10)));
    }

    #[test]
    fn test_scaled_delta_rounding() {
        assert_eq!(scaled_delta(5, 1, 2), 3);
        assert_eq!(scaled_delta(-5, 1, 2), -2);
        assert_eq!(scaled_delta(10, 1, 3), 3);
        assert_eq!(scaled_delta(i128::MAX / 2, 3, 4), (i128::MAX as f64 / 2.0 * 0.75) as i128);
    }
}
