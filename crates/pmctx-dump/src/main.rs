use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{Level, debug, warn};
use tracing_subscriber::EnvFilter;

use pmctx_core::archive::{ArchiveReader, ArchiveRecord, ArchiveSession, ReplayMode};
use pmctx_core::context::{self, ContextKind};
use pmctx_core::model::{Desc, FetchResult, InDomInstances, InstanceProfile, Pmid, Timestamp};
use pmctx_core::util::{interval_nanos, parse_interval, parse_time_with_base};
use pmctx_core::{ClientConfig, ErrorKind, PmError, set_client_config};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "pmctx-dump", about = "Inspect metric archives and live collectors")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the archive label and time bounds
    Label {
        /// Archive base path (without .label/.index/.0)
        archive: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List every data record in file order
    Records {
        archive: PathBuf,
        /// Show decoded values of result records
        #[arg(long)]
        values: bool,
    },
    /// Replay metrics from an archive
    Replay {
        archive: PathBuf,
        /// Metric id as domain.cluster.item (repeatable)
        #[arg(long = "pmid", required = true)]
        pmids: Vec<Pmid>,
        #[arg(long, value_enum, default_value_t = Mode::Forward)]
        mode: Mode,
        /// Start time: ISO 8601, unix seconds, -1h (from archive start), HH:MM
        #[arg(long)]
        start: Option<String>,
        /// Interpolation step, e.g. 10, 500ms, 1m
        #[arg(long, default_value = "10")]
        delta: String,
        /// Stop after this many samples (default: until end of log)
        #[arg(long)]
        samples: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Fetch metrics from a live collector
    Fetch {
        /// host[:port][?attr=value]
        host: String,
        #[arg(long = "pmid", required = true)]
        pmids: Vec<Pmid>,
        #[arg(long, default_value_t = 1)]
        samples: usize,
        /// Pause between samples
        #[arg(long, default_value = "1")]
        interval: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Forward,
    Backward,
    Interp,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    set_client_config(ClientConfig::from_env());

    let outcome = match &cli.command {
        Command::Label { archive, json } => dump_label(archive, *json),
        Command::Records { archive, values } => dump_records(archive, *values),
        Command::Replay {
            archive,
            pmids,
            mode,
            start,
            delta,
            samples,
            json,
        } => replay(
            archive,
            pmids,
            *mode,
            start.as_deref(),
            delta,
            *samples,
            *json,
        ),
        Command::Fetch {
            host,
            pmids,
            samples,
            interval,
            json,
        } => fetch_live(host, pmids, *samples, interval, *json),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["pmctx_dump", "pmctx_core"] {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

// ── Formatting helpers ───────────────────────────────────────────────────────

fn usage(message: String) -> PmError {
    PmError::new(ErrorKind::InvalidArgument, message)
}

fn fmt_age(ts: Timestamp) -> String {
    let Some(dt) = ts.to_datetime() else {
        return "?".to_string();
    };
    let age = Utc::now().signed_duration_since(dt);
    if age.num_days() > 0 {
        format!("{}d ago", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{}h ago", age.num_hours())
    } else if age.num_minutes() > 0 {
        format!("{}m ago", age.num_minutes())
    } else {
        format!("{}s ago", age.num_seconds().max(0))
    }
}

fn inst_label(inst: i32, names: Option<&InDomInstances>) -> String {
    match names.and_then(|n| n.name_of(inst)) {
        Some(name) => format!("[{inst} {name:?}]"),
        None if inst < 0 => String::new(),
        None => format!("[{inst}]"),
    }
}

fn print_result(result: &FetchResult, names: &HashMap<Pmid, InDomInstances>) {
    if result.is_mark() {
        println!("{}  <mark>", result.timestamp);
        return;
    }
    println!("{}", result.timestamp);
    for vs in &result.vsets {
        match &vs.values {
            Err(kind) => println!("  {:<12} {kind}", vs.pmid.to_string()),
            Ok(values) if values.is_empty() => {
                println!("  {:<12} (no values)", vs.pmid.to_string());
            }
            Ok(values) => {
                for iv in values {
                    println!(
                        "  {:<12} {:<14} {}",
                        vs.pmid.to_string(),
                        inst_label(iv.inst, names.get(&vs.pmid)),
                        iv.value
                    );
                }
            }
        }
    }
}

// ── JSON output types ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct LabelJson {
    base: String,
    version: u16,
    pid: u32,
    host: String,
    timezone: String,
    start: String,
    first: Option<String>,
    last: Option<String>,
}

#[derive(Serialize)]
struct SampleJson {
    timestamp: String,
    sec: i64,
    nsec: u32,
    mark: bool,
    metrics: Vec<MetricJson>,
}

#[derive(Serialize)]
struct MetricJson {
    pmid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    values: Vec<InstanceJson>,
}

#[derive(Serialize)]
struct InstanceJson {
    inst: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    value: String,
}

fn sample_to_json(result: &FetchResult, names: &HashMap<Pmid, InDomInstances>) -> SampleJson {
    let metrics = result
        .vsets
        .iter()
        .map(|vs| {
            let (error, values) = match &vs.values {
                Err(kind) => (Some(kind.to_string()), &[][..]),
                Ok(values) => (None, values.as_slice()),
            };
            let indom = names.get(&vs.pmid);
            MetricJson {
                pmid: vs.pmid.to_string(),
                error,
                values: values
                    .iter()
                    .map(|iv| InstanceJson {
                        inst: iv.inst,
                        name: indom.and_then(|n| n.name_of(iv.inst)).map(str::to_string),
                        value: iv.value.to_string(),
                    })
                    .collect(),
            }
        })
        .collect();
    SampleJson {
        timestamp: result.timestamp.to_string(),
        sec: result.timestamp.sec,
        nsec: result.timestamp.nsec,
        mark: result.is_mark(),
        metrics,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), PmError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| PmError::new(ErrorKind::Io, format!("json encoding failed: {e}")))?;
    println!("{text}");
    Ok(())
}

// ── label ────────────────────────────────────────────────────────────────────

fn dump_label(base: &Path, json: bool) -> Result<(), PmError> {
    let reader = ArchiveReader::open(base)?;
    let label = reader.label();
    let bounds = reader.time_bounds();

    if json {
        return print_json(&LabelJson {
            base: base.display().to_string(),
            version: label.version,
            pid: label.pid,
            host: label.host.clone(),
            timezone: label.timezone.clone(),
            start: label.start.to_string(),
            first: bounds.map(|(first, _)| first.to_string()),
            last: bounds.map(|(_, last)| last.to_string()),
        });
    }

    println!("Archive:   {}", base.display());
    println!("Version:   {}", label.version);
    println!("Host:      {}", label.host);
    println!("Timezone:  {}", label.timezone);
    println!("Pid:       {}", label.pid);
    println!("Start:     {}", label.start);
    match bounds {
        Some((first, last)) => {
            println!("Results:   {first} .. {last} ({})", fmt_age(last));
            println!(
                "Duration:  {:.3}s",
                last.as_secs_f64() - first.as_secs_f64()
            );
        }
        None => println!("Results:   (none)"),
    }
    println!(
        "Data:      {} bytes",
        reader.end_offset() - reader.start_offset()
    );
    Ok(())
}

// ── records ──────────────────────────────────────────────────────────────────

fn dump_records(base: &Path, values: bool) -> Result<(), PmError> {
    let mut reader = ArchiveReader::open(base)?;
    let mut offset = reader.start_offset();
    let mut count = 0usize;
    let no_names = HashMap::new();

    println!("{:>10} {:>7}  {:<26} Summary", "Offset", "Length", "Timestamp");
    println!("{}", "─".repeat(72));
    while let Some(rec) = reader.read_header_at(offset)? {
        let record = reader.read_record(&rec)?;
        let summary = match &record {
            ArchiveRecord::Desc(desc) => describe_desc(desc),
            ArchiveRecord::InDom(instances) => format!(
                "indom {} ({} instances)",
                instances.indom,
                instances.len()
            ),
            ArchiveRecord::Result(result) if result.is_mark() => "mark".to_string(),
            ArchiveRecord::Result(result) => format!("result ({} metrics)", result.vsets.len()),
        };
        println!(
            "{:>10} {:>7}  {:<26} {summary}",
            rec.start,
            rec.end - rec.start,
            rec.timestamp.to_string()
        );
        if values {
            if let ArchiveRecord::Result(result) = &record {
                if !result.is_mark() {
                    print_result(result, &no_names);
                }
            }
        }
        offset = rec.end;
        count += 1;
    }
    println!("{}", "─".repeat(72));
    println!("{count} records");
    Ok(())
}

fn describe_desc(desc: &Desc) -> String {
    let indom = if desc.indom.is_null() {
        "singular".to_string()
    } else {
        format!("indom {}", desc.indom)
    };
    format!(
        "desc {} {} {} {indom} units {}",
        desc.pmid, desc.value_type, desc.semantics, desc.units
    )
}

// ── replay ───────────────────────────────────────────────────────────────────

fn replay(
    base: &Path,
    pmids: &[Pmid],
    mode: Mode,
    start: Option<&str>,
    delta: &str,
    samples: Option<usize>,
    json: bool,
) -> Result<(), PmError> {
    let mut session = ArchiveSession::open(base)?;
    let label_start = session.label().start;
    let (first, last) = session
        .reader()
        .time_bounds()
        .unwrap_or((label_start, label_start));

    let origin = match start {
        Some(text) => {
            parse_time_with_base(text, first).map_err(|e| usage(e.to_string()))?
        }
        None => match mode {
            Mode::Backward => last,
            Mode::Forward | Mode::Interp => first,
        },
    };
    let replay_mode = match mode {
        Mode::Forward => ReplayMode::Forward,
        Mode::Backward => ReplayMode::Backward,
        Mode::Interp => {
            let step = parse_interval(delta).map_err(|e| usage(e.to_string()))?;
            ReplayMode::Interpolated {
                step_ns: interval_nanos(step),
            }
        }
    };
    session.set_mode(replay_mode, Some(origin))?;
    debug!(mode = %replay_mode, origin = %origin, "replay positioned");

    let names = instance_names(pmids, |pmid| {
        let desc = session.desc(pmid)?;
        if desc.indom.is_null() {
            return Ok(None);
        }
        session.indom(desc.indom).map(Some)
    });
    let profile = InstanceProfile::new();
    let mut out = Vec::new();
    let mut taken = 0usize;
    while samples.is_none_or(|limit| taken < limit) {
        let result = match session.fetch(pmids, &profile) {
            Ok(result) => result,
            Err(e) if e.kind() == ErrorKind::EndOfLog => break,
            Err(e) => return Err(e),
        };
        if json {
            out.push(sample_to_json(&result, &names));
        } else {
            print_result(&result, &names);
        }
        taken += 1;
    }

    if json {
        print_json(&out)?;
    } else {
        eprintln!("{taken} samples");
    }
    Ok(())
}

/// Instance names for every requested metric that has an instance domain.
fn instance_names(
    pmids: &[Pmid],
    mut lookup: impl FnMut(Pmid) -> Result<Option<InDomInstances>, PmError>,
) -> HashMap<Pmid, InDomInstances> {
    let mut names = HashMap::new();
    for &pmid in pmids {
        match lookup(pmid) {
            Ok(Some(instances)) => {
                names.insert(pmid, instances);
            }
            Ok(None) => {}
            Err(e) => warn!(pmid = %pmid, error = %e, "no instance names"),
        }
    }
    names
}

// ── fetch ────────────────────────────────────────────────────────────────────

fn fetch_live(
    host: &str,
    pmids: &[Pmid],
    samples: usize,
    interval: &str,
    json: bool,
) -> Result<(), PmError> {
    let pause: Duration = parse_interval(interval).map_err(|e| usage(e.to_string()))?;
    let handle = context::new_context(ContextKind::Host, host)?;
    let names = instance_names(pmids, |pmid| {
        let desc = handle.lookup_desc(pmid)?;
        if desc.indom.is_null() {
            return Ok(None);
        }
        handle.get_indom(desc.indom).map(Some)
    });

    let mut out = Vec::new();
    for n in 0..samples {
        if n > 0 {
            thread::sleep(pause);
        }
        let result = match handle.fetch(pmids) {
            Ok(result) => result,
            Err(e) if e.kind() == ErrorKind::ConnectionFailed => {
                warn!(error = %e, "fetch failed, reconnecting");
                handle.reconnect()?;
                continue;
            }
            Err(e) => return Err(e),
        };
        if json {
            out.push(sample_to_json(&result, &names));
        } else {
            print_result(&result, &names);
        }
    }
    if json {
        print_json(&out)?;
    }
    handle.destroy()
}
