mod error;
mod invoker;
mod orchestrator;
mod report;
mod space;
mod store;

pub use error::{Error, Result};
pub use invoker::{
    Outcome, ProcessSolver, RunInvoker, Solver, SolverArgs, SolverExit, DEFAULT_CSV_RESULT,
    DEFAULT_SOLVER, DEFAULT_STEP_RESULT, DEFAULT_THROUGHPUT_RESULT,
};
pub use orchestrator::{FailedRun, Orchestrator, SweepSummary};
pub use report::{SweepReporter, TracingReporter};
pub use space::{
    load_experiment, resolve_experiment_path, ExperimentSpec, ParamValue, Parameter,
    ParameterAssignment, ParameterSpace, OPTIONAL_KEYS, REQUIRED_KEYS,
};
pub use store::{ensure_initialized, CsvSchema, SUMMARY_COLUMNS};
