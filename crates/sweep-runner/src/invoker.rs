use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Error, Result};
use crate::report::SweepReporter;
use crate::space::{ParamValue, ParameterAssignment};

pub const DEFAULT_SOLVER: &str = "./build/CAL-MAPF";
pub const DEFAULT_STEP_RESULT: &str = "./result/step_result.txt";
pub const DEFAULT_CSV_RESULT: &str = "./result/result.csv";
pub const DEFAULT_THROUGHPUT_RESULT: &str = "./result/throughput.csv";

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct SolverArgs {
    pub map: String,
    pub cache: String,
    pub look_ahead: String,
    pub delay_deadline: String,
    pub ngoals: String,
    pub goal_generation: String,
    pub goals_k: String,
    pub goals_m: String,
    pub nagents: String,
    pub seed: String,
    pub time_limit_sec: String,
    pub output_step_result: PathBuf,
    pub output_csv_result: PathBuf,
    pub output_throughput_result: PathBuf,
    pub log_short: bool,
    pub debug: bool,
}

impl SolverArgs {
    pub fn from_assignment(assignment: &ParameterAssignment) -> Result<Self> {
        let required = |key: &str| {
            assignment
                .get(key)
                .map(|v| v.to_string())
                .ok_or_else(|| Error::MissingParameter(key.to_string()))
        };
        let or_default = |key: &str, default: &str| {
            assignment
                .get(key)
                .map(|v| v.to_string())
                .unwrap_or_else(|| default.to_string())
        };
        let flag = |key: &str| {
            assignment
                .get(key)
                .and_then(ParamValue::as_bool)
                .unwrap_or(false)
        };
        Ok(SolverArgs {
            map: required("map")?,
            cache: required("cache")?,
            look_ahead: required("look_ahead")?,
            delay_deadline: required("delay_deadline")?,
            ngoals: required("ngoals")?,
            goal_generation: required("gg")?,
            goals_k: required("goals_k")?,
            goals_m: required("goals_m")?,
            nagents: required("nagents")?,
            seed: or_default("seed", "0"),
            time_limit_sec: or_default("time_limit_sec", "10"),
            output_step_result: or_default("output_step_result", DEFAULT_STEP_RESULT).into(),
            output_csv_result: or_default("output_csv_result", DEFAULT_CSV_RESULT).into(),
            output_throughput_result: or_default(
                "output_throughput_result",
                DEFAULT_THROUGHPUT_RESULT,
            )
            .into(),
            log_short: flag("log_short"),
            debug: flag("debug"),
        })
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            ("--map", self.map.as_str()),
            ("--cache", self.cache.as_str()),
            ("--look-ahead", self.look_ahead.as_str()),
            ("--delay-deadline", self.delay_deadline.as_str()),
            ("--ngoals", self.ngoals.as_str()),
            ("-gg", self.goal_generation.as_str()),
            ("--goals-k", self.goals_k.as_str()),
            ("--goals-m", self.goals_m.as_str()),
            ("--nagents", self.nagents.as_str()),
            ("--seed", self.seed.as_str()),
            ("--time_limit_sec", self.time_limit_sec.as_str()),
        ]
        .into_iter()
        .flat_map(|(flag, value)| [flag.to_string(), value.to_string()])
        .collect();
        for (flag, path) in [
            ("--output_step_result", &self.output_step_result),
            ("--output_csv_result", &self.output_csv_result),
            ("--output_throughput_result", &self.output_throughput_result),
        ] {
            args.push(flag.to_string());
            args.push(path.to_string_lossy().into_owned());
        }
        if self.log_short {
            args.push("--log_short".to_string());
        }
        if self.debug {
            args.push("--debug".to_string());
        }
        args
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverExit {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stderr: String,
}

impl SolverExit {
    pub fn success() -> Self {
        SolverExit {
            code: Some(0),
            stderr: String::new(),
        }
    }
}

pub trait Solver {
    fn program(&self) -> &str;

    fn solve(&mut self, args: &SolverArgs) -> io::Result<SolverExit>;
}

#[derive(Debug, Clone)]
pub struct ProcessSolver {
    program: String,
    working_dir: Option<PathBuf>,
}

impl ProcessSolver {
    pub fn new(program: impl Into<String>) -> Self {
        ProcessSolver {
            program: program.into(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: &Path) -> Self {
        self.working_dir = Some(dir.to_path_buf());
        self
    }
}

impl Solver for ProcessSolver {
    fn program(&self) -> &str {
        &self.program
    }

    fn solve(&mut self, args: &SolverArgs) -> io::Result<SolverExit> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args.to_args());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            let mut bytes = Vec::new();
            pipe.read_to_end(&mut bytes)?;
            stderr = String::from_utf8_lossy(&bytes).into_owned();
        }
        let status = child.wait()?;
        Ok(SolverExit {
            code: status.code(),
            stderr,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure {
        exit_code: Option<i32>,
        stderr: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

pub struct RunInvoker<S> {
    solver: S,
}

impl<S: Solver> RunInvoker<S> {
    pub fn new(solver: S) -> Self {
        RunInvoker { solver }
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn command_line(&self, args: &SolverArgs) -> String {
        let mut parts = vec![self.solver.program().to_string()];
        parts.extend(args.to_args());
        shell_join(&parts)
    }

    pub fn execute(
        &mut self,
        index: usize,
        args: &SolverArgs,
        reporter: &mut dyn SweepReporter,
    ) -> Outcome {
        let command_line = self.command_line(args);
        let outcome = match self.solver.solve(args) {
            Ok(exit) if exit.code == Some(0) => Outcome::Success,
            Ok(exit) => Outcome::Failure {
                exit_code: exit.code,
                stderr: exit.stderr,
            },
            Err(e) => Outcome::Failure {
                exit_code: None,
                stderr: format!("failed to start solver: {}", e),
            },
        };
        if let Outcome::Failure { exit_code, stderr } = &outcome {
            reporter.run_failed(index, &command_line, *exit_code, &stderr_tail(stderr));
        }
        outcome
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}
