use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, warn};

pub const BASELINE_CACHE: &str = "NONE";
pub const DEFAULT_OUTPUT: &str = "overhead_analysis.csv";

pub const REQUIRED_COLUMNS: [&str; 6] = [
    "map_name",
    "cache",
    "goal_generation_type",
    "ngoals",
    "nagents",
    "elapsed_time",
];

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("input file '{}' does not exist", .0.display())]
    MissingInput(PathBuf),
    #[error("input file '{}' lacks required columns: {}", .path.display(), .columns.join(", "))]
    MissingColumns { path: PathBuf, columns: Vec<String> },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Measurement {
    pub map_name: String,
    pub cache: String,
    pub goal_generation_type: String,
    pub ngoals: u64,
    pub nagents: u64,
    pub elapsed_time: f64,
}

impl Measurement {
    fn is_baseline(&self) -> bool {
        self.cache == BASELINE_CACHE
    }

    fn key(&self) -> GroupKey {
        GroupKey {
            map_name: self.map_name.clone(),
            goal_generation_type: self.goal_generation_type.clone(),
            ngoals: self.ngoals,
            nagents: self.nagents,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupKey {
    pub map_name: String,
    pub goal_generation_type: String,
    pub ngoals: u64,
    pub nagents: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Measurements {
    pub rows: Vec<Measurement>,
    pub skipped_rows: usize,
}

pub fn read_measurements(path: &Path) -> Result<Measurements> {
    if !path.is_file() {
        return Err(AnalysisError::MissingInput(path.to_path_buf()));
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !headers.iter().any(|h| h == **c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(AnalysisError::MissingColumns {
            path: path.to_path_buf(),
            columns: missing,
        });
    }

    let mut out = Measurements::default();
    for record in reader.records() {
        let parsed = record.and_then(|r| r.deserialize::<Measurement>(Some(&headers)));
        match parsed {
            Ok(row) if row.elapsed_time.is_finite() => out.rows.push(row),
            Ok(row) => {
                debug!(elapsed_time = row.elapsed_time, "skipping non-finite elapsed time");
                out.skipped_rows += 1;
            }
            Err(e) => {
                debug!(error = %e, "skipping unparsable result row");
                out.skipped_rows += 1;
            }
        }
    }
    if out.skipped_rows > 0 {
        warn!(
            skipped = out.skipped_rows,
            path = %path.display(),
            "some result rows could not be parsed"
        );
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverheadRecord {
    pub map_name: String,
    pub goal_generation_type: String,
    pub ngoals: u64,
    pub nagents: u64,
    #[serde(serialize_with = "two_decimals")]
    pub baseline_time: f64,
    #[serde(serialize_with = "two_decimals")]
    pub avg_cached_time: f64,
    #[serde(serialize_with = "two_decimals")]
    pub overhead_percentage: f64,
}

fn two_decimals<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{:.2}", value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gap {
    NoBaseline,
    NoTreatment,
    ZeroBaseline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedGroup {
    pub key: GroupKey,
    pub gap: Gap,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Percentiles {
    pub p0: f64,
    pub p50: f64,
    pub p99: f64,
}

impl Percentiles {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        Some(Percentiles {
            p0: percentile(&sorted, 0.0)?,
            p50: percentile(&sorted, 50.0)?,
            p99: percentile(&sorted, 99.0)?,
        })
    }
}

pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = p.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OverheadReport {
    pub records: Vec<OverheadRecord>,
    pub skipped: Vec<SkippedGroup>,
    pub overall: Option<Percentiles>,
    pub by_agent_count: BTreeMap<u64, Percentiles>,
}

impl OverheadReport {
    pub fn has_result(&self) -> bool {
        self.overall.is_some()
    }
}

pub fn analyze(rows: &[Measurement]) -> OverheadReport {
    let mut groups: BTreeMap<GroupKey, Vec<&Measurement>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.key()).or_default().push(row);
    }

    let mut report = OverheadReport::default();
    for (key, members) in groups {
        match compare_group(&members) {
            Ok((baseline_time, avg_cached_time)) => {
                report.records.push(OverheadRecord {
                    overhead_percentage: (avg_cached_time - baseline_time) / baseline_time * 100.0,
                    map_name: key.map_name,
                    goal_generation_type: key.goal_generation_type,
                    ngoals: key.ngoals,
                    nagents: key.nagents,
                    baseline_time,
                    avg_cached_time,
                });
            }
            Err(gap) => {
                debug!(?key, ?gap, "group excluded from overhead analysis");
                report.skipped.push(SkippedGroup { key, gap });
            }
        }
    }

    let overheads: Vec<f64> = report.records.iter().map(|r| r.overhead_percentage).collect();
    report.overall = Percentiles::from_values(&overheads);

    let mut per_agents: BTreeMap<u64, Vec<f64>> = BTreeMap::new();
    for record in &report.records {
        per_agents
            .entry(record.nagents)
            .or_default()
            .push(record.overhead_percentage);
    }
    report.by_agent_count = per_agents
        .into_iter()
        .filter_map(|(n, values)| Percentiles::from_values(&values).map(|p| (n, p)))
        .collect();

    report.records.sort_by(|a, b| {
        a.map_name
            .cmp(&b.map_name)
            .then_with(|| a.nagents.cmp(&b.nagents))
    });
    report
}

/// Returns (baseline time, mean treatment time). With several baselines the first one wins.
fn compare_group(members: &[&Measurement]) -> std::result::Result<(f64, f64), Gap> {
    let baseline = members
        .iter()
        .find(|m| m.is_baseline())
        .ok_or(Gap::NoBaseline)?;
    let treatments: Vec<f64> = members
        .iter()
        .filter(|m| !m.is_baseline())
        .map(|m| m.elapsed_time)
        .collect();
    if treatments.is_empty() {
        return Err(Gap::NoTreatment);
    }
    if baseline.elapsed_time == 0.0 {
        return Err(Gap::ZeroBaseline);
    }
    let mean = treatments.iter().sum::<f64>() / treatments.len() as f64;
    Ok((baseline.elapsed_time, mean))
}

pub fn write_records(path: &Path, records: &[OverheadRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
