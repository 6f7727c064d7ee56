use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::Value as YamlValue;
use tracing::warn;

use crate::error::{Error, Result};

pub const REQUIRED_KEYS: [&str; 9] = [
    "map",
    "cache",
    "look_ahead",
    "delay_deadline",
    "ngoals",
    "gg",
    "goals_k",
    "goals_m",
    "nagents",
];

pub const OPTIONAL_KEYS: [&str; 7] = [
    "seed",
    "time_limit_sec",
    "output_step_result",
    "output_csv_result",
    "output_throughput_result",
    "log_short",
    "debug",
];

const BOOL_KEYS: [&str; 2] = ["log_short", "debug"];

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    fn from_yaml(value: &YamlValue) -> Option<Self> {
        match value {
            YamlValue::Bool(b) => Some(ParamValue::Bool(*b)),
            YamlValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(ParamValue::Int(i))
                } else {
                    n.as_f64().map(ParamValue::Float)
                }
            }
            YamlValue::String(s) => Some(ParamValue::Str(s.clone())),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{:.1}", x),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub values: Vec<ParamValue>,
    pub is_list: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentSpec {
    pub source: PathBuf,
    pub parameters: Vec<Parameter>,
}

pub fn resolve_experiment_path(experiment: &str, experiment_dir: &Path) -> PathBuf {
    let direct = PathBuf::from(experiment);
    let is_yaml = matches!(
        direct.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml && direct.is_file() {
        return direct;
    }
    experiment_dir.join(format!("{}.yaml", experiment))
}

pub fn load_experiment(path: &Path) -> Result<ExperimentSpec> {
    if !path.is_file() {
        return Err(Error::MissingExperiment(path.to_path_buf()));
    }
    let raw = fs::read_to_string(path)?;
    ExperimentSpec::parse(&raw, path)
}

impl ExperimentSpec {
    pub fn parse(raw: &str, source: &Path) -> Result<Self> {
        let doc: YamlValue = serde_yaml::from_str(raw).map_err(|e| Error::Yaml {
            path: source.to_path_buf(),
            source: e,
        })?;
        let invalid = |problems: Vec<String>| Error::InvalidExperiment {
            path: source.to_path_buf(),
            problems,
        };
        let mapping = match doc {
            YamlValue::Mapping(m) => m,
            _ => return Err(invalid(vec!["top level must be a mapping".to_string()])),
        };

        let mut problems = Vec::new();
        let mut parameters = Vec::new();
        for (key, value) in mapping.iter() {
            let Some(name) = key.as_str() else {
                problems.push(format!("non-string key {:?}", key));
                continue;
            };
            let (raw_values, is_list) = match value {
                YamlValue::Sequence(seq) => (seq.iter().collect::<Vec<_>>(), true),
                other => (vec![other], false),
            };
            let mut values = Vec::with_capacity(raw_values.len());
            for raw_value in raw_values {
                match ParamValue::from_yaml(raw_value) {
                    Some(v) => values.push(v),
                    None => problems.push(format!("{}: values must be scalars", name)),
                }
            }
            if BOOL_KEYS.contains(&name) && values.iter().any(|v| v.as_bool().is_none()) {
                problems.push(format!("{}: expected boolean", name));
            }
            if !REQUIRED_KEYS.contains(&name) && !OPTIONAL_KEYS.contains(&name) {
                warn!(key = name, "unknown experiment key; it is swept but not passed to the solver");
            }
            parameters.push(Parameter {
                name: name.to_string(),
                values,
                is_list,
            });
        }
        for required in REQUIRED_KEYS {
            if !parameters.iter().any(|p| p.name == required) {
                problems.push(format!("missing required key {}", required));
            }
        }
        if checked_product(&parameters).is_none() {
            problems.push("too many combinations".to_string());
        }
        if !problems.is_empty() {
            return Err(invalid(problems));
        }
        Ok(ExperimentSpec {
            source: source.to_path_buf(),
            parameters,
        })
    }

    pub fn combination_count(&self) -> usize {
        checked_product(&self.parameters).unwrap_or(usize::MAX)
    }

    pub fn parameter_space(&self) -> ParameterSpace<'_> {
        ParameterSpace::new(self)
    }
}

fn checked_product(parameters: &[Parameter]) -> Option<usize> {
    parameters
        .iter()
        .try_fold(1usize, |acc, p| acc.checked_mul(p.values.len()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterAssignment {
    values: Vec<(String, ParamValue)>,
}

impl ParameterAssignment {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, ParamValue)> for ParameterAssignment {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        ParameterAssignment {
            values: iter.into_iter().collect(),
        }
    }
}

/// Lazy odometer over the product; the last declared parameter turns fastest.
pub struct ParameterSpace<'a> {
    spec: &'a ExperimentSpec,
    cursor: Vec<usize>,
    remaining: usize,
}

impl<'a> ParameterSpace<'a> {
    fn new(spec: &'a ExperimentSpec) -> Self {
        ParameterSpace {
            spec,
            cursor: vec![0; spec.parameters.len()],
            remaining: spec.combination_count(),
        }
    }

    fn advance(&mut self) {
        for (pos, param) in self.spec.parameters.iter().enumerate().rev() {
            self.cursor[pos] += 1;
            if self.cursor[pos] < param.values.len() {
                return;
            }
            self.cursor[pos] = 0;
        }
    }
}

impl Iterator for ParameterSpace<'_> {
    type Item = ParameterAssignment;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let assignment = self
            .spec
            .parameters
            .iter()
            .zip(&self.cursor)
            .map(|(param, &idx)| (param.name.clone(), param.values[idx].clone()))
            .collect();
        self.remaining -= 1;
        self.advance();
        Some(assignment)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for ParameterSpace<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const BASE: &str = "\
map: [random-32-32-20.map, warehouse.map]
cache: [NONE, LRU, FIFO]
look_ahead: 1
delay_deadline: 2
ngoals: 1000
gg: [MK-Heuristic]
goals_k: 3
goals_m: 100
nagents: [100, 200]
";

    fn parse(raw: &str) -> Result<ExperimentSpec> {
        ExperimentSpec::parse(raw, Path::new("exp.yaml"))
    }

    #[test]
    fn product_size_matches_list_lengths() {
        let spec = parse(BASE).expect("valid spec");
        assert_eq!(spec.combination_count(), 2 * 3 * 2);
        let all: Vec<_> = spec.parameter_space().collect();
        assert_eq!(all.len(), 12);
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn last_declared_list_varies_fastest() {
        let spec = parse(BASE).expect("valid spec");
        let firsts: Vec<String> = spec
            .parameter_space()
            .take(3)
            .map(|a| {
                format!(
                    "{}/{}/{}",
                    a.get("map").expect("map"),
                    a.get("cache").expect("cache"),
                    a.get("nagents").expect("nagents")
                )
            })
            .collect();
        assert_eq!(
            firsts,
            vec![
                "random-32-32-20.map/NONE/100",
                "random-32-32-20.map/NONE/200",
                "random-32-32-20.map/LRU/100",
            ]
        );
    }

    #[test]
    fn scalars_are_held_fixed() {
        let spec = parse(BASE).expect("valid spec");
        assert!(spec
            .parameter_space()
            .all(|a| a.get("goals_m") == Some(&ParamValue::Int(100))));
    }

    #[test]
    fn iteration_is_restartable() {
        let spec = parse(BASE).expect("valid spec");
        let first: Vec<_> = spec.parameter_space().collect();
        let second: Vec<_> = spec.parameter_space().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn duplicate_inputs_yield_independent_assignments() {
        let raw = BASE.replace("cache: [NONE, LRU, FIFO]", "cache: [LRU, LRU]");
        let spec = parse(&raw).expect("valid spec");
        assert_eq!(spec.parameter_space().count(), 2 * 2 * 2);
    }

    #[test]
    fn empty_list_yields_no_assignments() {
        let raw = BASE.replace("nagents: [100, 200]", "nagents: []");
        let spec = parse(&raw).expect("valid spec");
        assert_eq!(spec.combination_count(), 0);
        assert_eq!(spec.parameter_space().next(), None);
    }

    #[test]
    fn reports_all_missing_required_keys() {
        let err = parse("map: a.map\ncache: NONE\n").expect_err("should fail");
        let msg = err.to_string();
        assert!(err.is_configuration());
        for key in ["look_ahead", "delay_deadline", "ngoals", "gg", "goals_k", "goals_m", "nagents"] {
            assert!(msg.contains(key), "missing {}: {}", key, msg);
        }
        assert!(!msg.contains("key map"), "should not report map: {}", msg);
    }

    #[test]
    fn rejects_non_boolean_flags_and_nested_values() {
        let raw = format!("{}log_short: yes-please\nseed: {{a: 1}}\n", BASE);
        let msg = parse(&raw).expect_err("should fail").to_string();
        assert!(msg.contains("log_short: expected boolean"), "{}", msg);
        assert!(msg.contains("seed: values must be scalars"), "{}", msg);
    }

    #[test]
    fn rejects_combination_counts_that_overflow() {
        let axes: String = (0..70).map(|i| format!("extra_{}: [0, 1]\n", i)).collect();
        let raw = format!("{}{}", BASE, axes);
        let err = parse(&raw).expect_err("should fail");
        assert!(err.is_configuration());
        assert!(err.to_string().contains("too many combinations"), "{}", err);
    }

    #[test]
    fn whole_floats_keep_their_decimal_point() {
        assert_eq!(ParamValue::Float(1.0).to_string(), "1.0");
        assert_eq!(ParamValue::Float(-2.0).to_string(), "-2.0");
        assert_eq!(ParamValue::Float(0.25).to_string(), "0.25");
        assert_eq!(ParamValue::Int(1).to_string(), "1");
        let raw = BASE.replace("look_ahead: 1\n", "look_ahead: 1.0\n");
        let spec = parse(&raw).expect("valid spec");
        let first = spec.parameter_space().next().expect("one assignment");
        assert_eq!(first.get("look_ahead").map(|v| v.to_string()).as_deref(), Some("1.0"));
    }

    #[test]
    fn rejects_non_mapping_document() {
        let err = parse("- a\n- b\n").expect_err("should fail");
        assert!(err.to_string().contains("top level must be a mapping"));
    }

    #[test]
    fn missing_file_is_configuration_error() {
        let dir = std::env::temp_dir().join(format!(
            "sweep_space_missing_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let path = resolve_experiment_path("nope", &dir);
        assert_eq!(path, dir.join("nope.yaml"));
        let err = load_experiment(&path).expect_err("missing file");
        assert!(matches!(err, Error::MissingExperiment(_)));
    }

    #[test]
    fn resolves_names_and_direct_paths() {
        let dir = std::env::temp_dir().join(format!(
            "sweep_space_resolve_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("temp dir");
        let file = dir.join("overhead.yaml");
        fs::write(&file, BASE).expect("write spec");

        let by_name = resolve_experiment_path("overhead", &dir);
        assert_eq!(by_name, file);
        let by_path = resolve_experiment_path(&file.to_string_lossy(), Path::new("elsewhere"));
        assert_eq!(by_path, file);
        let spec = load_experiment(&by_name).expect("load");
        assert_eq!(spec.parameters[0].name, "map");
        let _ = fs::remove_dir_all(dir);
    }
}
