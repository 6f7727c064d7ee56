use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;

use csv::WriterBuilder;
use tracing::debug;

use crate::error::{Error, Result};

pub static SUMMARY_COLUMNS: [&str; 17] = [
    "map_name",
    "cache",
    "look_ahead",
    "delay_deadline",
    "goal_generation_type",
    "ngoals",
    "nagents",
    "seed",
    "verbose",
    "time_limit_sec",
    "goals_m",
    "goals_k",
    "cache_hit_rate",
    "makespan",
    "p0_steps",
    "p50_steps",
    "p99steps",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CsvSchema {
    Summary,
    Throughput,
}

impl CsvSchema {
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            CsvSchema::Summary => &SUMMARY_COLUMNS,
            CsvSchema::Throughput => &SUMMARY_COLUMNS[..12],
        }
    }

    pub fn header(self) -> String {
        self.columns().join(",")
    }
}

/// Creates `path` with the schema's header unless the file already exists.
///
/// Returns `true` when the file was created by this call. Existing files are never opened
/// for writing, so accumulated rows survive any number of calls.
pub fn ensure_initialized(path: &Path, schema: CsvSchema) -> Result<bool> {
    let io_err = |source: std::io::Error| Error::ResultFile {
        path: path.to_path_buf(),
        source,
    };
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(io_err(e)),
    };
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
    writer.write_record(schema.columns())?;
    writer.flush().map_err(io_err)?;
    debug!(path = %path.display(), ?schema, "created result file");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn scratch(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "sweep_store_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ))
    }

    #[test]
    fn creates_parents_and_writes_header_once() {
        let root = scratch("once");
        let path = root.join("nested").join("result.csv");
        assert!(ensure_initialized(&path, CsvSchema::Summary).expect("first"));
        assert!(!ensure_initialized(&path, CsvSchema::Summary).expect("second"));
        let body = fs::read_to_string(&path).expect("read");
        assert_eq!(body, format!("{}\n", CsvSchema::Summary.header()));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn existing_rows_are_preserved() {
        let root = scratch("keep");
        let path = root.join("throughput.csv");
        ensure_initialized(&path, CsvSchema::Throughput).expect("init");
        let mut body = fs::read_to_string(&path).expect("read");
        body.push_str("a.map,NONE,1,2,MK,10,5,0,,10,100,3\n");
        fs::write(&path, &body).expect("append row");

        ensure_initialized(&path, CsvSchema::Throughput).expect("re-init");
        assert_eq!(fs::read_to_string(&path).expect("read"), body);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn schemas_match_solver_headers() {
        assert_eq!(
            CsvSchema::Summary.header(),
            "map_name,cache,look_ahead,delay_deadline,goal_generation_type,ngoals,nagents,seed,verbose,time_limit_sec,goals_m,goals_k,cache_hit_rate,makespan,p0_steps,p50_steps,p99steps"
        );
        assert_eq!(
            CsvSchema::Throughput.header(),
            "map_name,cache,look_ahead,delay_deadline,goal_generation_type,ngoals,nagents,seed,verbose,time_limit_sec,goals_m,goals_k"
        );
    }
}
