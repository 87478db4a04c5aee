//! Small archives shared by the archive and context tests.

use std::path::{Path, PathBuf};

use super::writer::{ArchiveWriter, WriterOptions};
use crate::model::desc::TIME_MSEC;
use crate::model::{
    Desc, FetchResult, IN_NULL, InDom, InDomInstances, InstanceValue, Pmid, Semantics,
    Timestamp, Units, Value, ValueSet, ValueType,
};

/// U64 counter, singular. 1000 per 10s.
pub const PMID_COUNT: Pmid = Pmid::from_raw((1 << 22) | 1);
/// U32 instant over `DISK_INDOM`; instance 2 appears at t=130.
pub const PMID_DISK: Pmid = Pmid::from_raw((1 << 22) | 2);
/// Double instant, logged every 20s only.
pub const PMID_LOAD: Pmid = Pmid::from_raw((2 << 22) | 1);
/// String instant: "alpha" at 100, "beta" at 130.
pub const PMID_NAME: Pmid = Pmid::from_raw((2 << 22) | 2);
/// I32 discrete: 1 at 100, 5 at 120.
pub const PMID_STATE: Pmid = Pmid::from_raw((2 << 22) | 3);
/// String counter, which cannot be interpolated.
pub const PMID_BAD_COUNTER: Pmid = Pmid::from_raw((2 << 22) | 4);

pub const DISK_INDOM: InDom = InDom::from_raw((1 << 22) | 1);

fn desc(pmid: Pmid, value_type: ValueType, indom: InDom, semantics: Semantics) -> Desc {
    Desc {
        pmid,
        value_type,
        indom,
        semantics,
        units: if semantics == Semantics::Counter {
            Units::count()
        } else {
            Units::time(TIME_MSEC)
        },
    }
}

fn single(pmid: Pmid, value: Value) -> ValueSet {
    ValueSet::new(pmid, vec![InstanceValue::new(IN_NULL, value)])
}

fn disks(values: &[u32]) -> ValueSet {
    ValueSet::new(
        PMID_DISK,
        values
            .iter()
            .enumerate()
            .map(|(i, v)| InstanceValue::new(i as i32, Value::U32(*v)))
            .collect(),
    )
}

/// Results at t = 100, 110, 120, 130, 140 with a mix of metric kinds.
pub fn build_sample_archive(dir: &Path, options: WriterOptions) -> PathBuf {
    let base = dir.join("sample");
    let t = Timestamp::from_secs;
    let mut w = ArchiveWriter::with_options(&base, "sample-host", "UTC", t(100), options).unwrap();

    w.write_desc(&desc(PMID_COUNT, ValueType::U64, InDom::NULL, Semantics::Counter))
        .unwrap();
    w.write_desc(&desc(PMID_DISK, ValueType::U32, DISK_INDOM, Semantics::Instant))
        .unwrap();
    w.write_indom(&InDomInstances::new(
        DISK_INDOM,
        t(100),
        vec![(0, "sda".into()), (1, "sdb".into())],
    ))
    .unwrap();
    w.write_desc(&desc(PMID_LOAD, ValueType::Double, InDom::NULL, Semantics::Instant))
        .unwrap();
    w.write_desc(&desc(PMID_NAME, ValueType::String, InDom::NULL, Semantics::Instant))
        .unwrap();
    w.write_desc(&desc(PMID_STATE, ValueType::I32, InDom::NULL, Semantics::Discrete))
        .unwrap();
    w.write_desc(&desc(
        PMID_BAD_COUNTER,
        ValueType::String,
        InDom::NULL,
        Semantics::Counter,
    ))
    .unwrap();

    w.write_result(&FetchResult::new(
        t(100),
        vec![
            single(PMID_COUNT, Value::U64(1000)),
            disks(&[10, 20]),
            single(PMID_LOAD, Value::Double(1.0)),
            single(PMID_NAME, Value::String("alpha".into())),
            single(PMID_STATE, Value::I32(1)),
            single(PMID_BAD_COUNTER, Value::String("x".into())),
        ],
    ))
    .unwrap();
    w.write_result(&FetchResult::new(
        t(110),
        vec![single(PMID_COUNT, Value::U64(2000)), disks(&[20, 40])],
    ))
    .unwrap();
    w.write_result(&FetchResult::new(
        t(120),
        vec![
            single(PMID_COUNT, Value::U64(3000)),
            disks(&[30, 60]),
            single(PMID_LOAD, Value::Double(3.0)),
            single(PMID_STATE, Value::I32(5)),
            single(PMID_BAD_COUNTER, Value::String("y".into())),
        ],
    ))
    .unwrap();
    w.write_indom(&InDomInstances::new(
        DISK_INDOM,
        t(130),
        vec![(0, "sda".into()), (1, "sdb".into()), (2, "sdc".into())],
    ))
    .unwrap();
    w.write_result(&FetchResult::new(
        t(130),
        vec![
            single(PMID_COUNT, Value::U64(4000)),
            disks(&[40, 80, 5]),
            single(PMID_NAME, Value::String("beta".into())),
        ],
    ))
    .unwrap();
    w.write_result(&FetchResult::new(
        t(140),
        vec![
            single(PMID_COUNT, Value::U64(5000)),
            disks(&[50, 100, 10]),
            single(PMID_LOAD, Value::Double(5.0)),
        ],
    ))
    .unwrap();

    w.finish().unwrap()
}

/// One I64 instant metric: 10 at t=0, mark at t=5, 20 at t=10, 30 at t=20.
pub fn build_marked_archive(dir: &Path) -> PathBuf {
    let base = dir.join("marked");
    let t = Timestamp::from_secs;
    let mut w = ArchiveWriter::create(&base, "marked-host", "UTC", t(0)).unwrap();
    w.write_desc(&desc(PMID_COUNT, ValueType::I64, InDom::NULL, Semantics::Instant))
        .unwrap();
    w.write_result(&FetchResult::new(t(0), vec![single(PMID_COUNT, Value::I64(10))]))
        .unwrap();
    w.write_mark(t(5)).unwrap();
    w.write_result(&FetchResult::new(t(10), vec![single(PMID_COUNT, Value::I64(20))]))
        .unwrap();
    w.write_result(&FetchResult::new(t(20), vec![single(PMID_COUNT, Value::I64(30))]))
        .unwrap();
    w.finish().unwrap()
}
