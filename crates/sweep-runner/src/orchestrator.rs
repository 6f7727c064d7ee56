use std::collections::HashSet;
use std::path::PathBuf;

use tracing::debug;

use crate::error::Result;
use crate::invoker::{Outcome, RunInvoker, Solver, SolverArgs};
use crate::report::SweepReporter;
use crate::space::ExperimentSpec;
use crate::store::{ensure_initialized, CsvSchema};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRun {
    pub index: usize,
    pub command_line: String,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SweepSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failures: Vec<FailedRun>,
    pub dry_run: bool,
}

pub struct Orchestrator<S, R> {
    invoker: RunInvoker<S>,
    reporter: R,
    initialized: HashSet<(PathBuf, CsvSchema)>,
    dry_run: bool,
}

impl<S: Solver, R: SweepReporter> Orchestrator<S, R> {
    pub fn new(solver: S, reporter: R) -> Self {
        Orchestrator {
            invoker: RunInvoker::new(solver),
            reporter,
            initialized: HashSet::new(),
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn invoker(&self) -> &RunInvoker<S> {
        &self.invoker
    }

    pub fn run(&mut self, spec: &ExperimentSpec) -> Result<SweepSummary> {
        let total = spec.combination_count();
        let mut summary = SweepSummary {
            total,
            dry_run: self.dry_run,
            ..SweepSummary::default()
        };
        for (index, assignment) in spec.parameter_space().enumerate() {
            let args = SolverArgs::from_assignment(&assignment)?;
            let command_line = self.invoker.command_line(&args);
            self.reporter.run_started(index, total, &command_line);
            if self.dry_run {
                continue;
            }
            self.ensure_result_files(&args)?;
            match self.invoker.execute(index, &args, &mut self.reporter) {
                Outcome::Success => summary.succeeded += 1,
                Outcome::Failure { exit_code, .. } => summary.failures.push(FailedRun {
                    index,
                    command_line,
                    exit_code,
                }),
            }
        }
        self.reporter.sweep_finished(&summary);
        Ok(summary)
    }

    fn ensure_result_files(&mut self, args: &SolverArgs) -> Result<()> {
        for (path, schema) in [
            (&args.output_csv_result, CsvSchema::Summary),
            (&args.output_throughput_result, CsvSchema::Throughput),
        ] {
            if !self.initialized.insert((path.clone(), schema)) {
                continue;
            }
            if !ensure_initialized(path, schema)? {
                debug!(path = %path.display(), "result file already present");
            }
        }
        Ok(())
    }
}
