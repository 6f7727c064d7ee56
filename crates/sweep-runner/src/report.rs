use tracing::{error, info};

use crate::orchestrator::SweepSummary;

pub trait SweepReporter {
    fn run_started(&mut self, index: usize, total: usize, command_line: &str);

    fn run_failed(
        &mut self,
        index: usize,
        command_line: &str,
        exit_code: Option<i32>,
        stderr: &str,
    );

    fn sweep_finished(&mut self, summary: &SweepSummary);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl SweepReporter for TracingReporter {
    fn run_started(&mut self, index: usize, total: usize, command_line: &str) {
        info!("[{}/{}] executing: {}", index + 1, total, command_line);
    }

    fn run_failed(
        &mut self,
        index: usize,
        command_line: &str,
        exit_code: Option<i32>,
        stderr: &str,
    ) {
        let code = exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string());
        error!(
            combination = index,
            exit_code = %code,
            stderr = stderr.trim_end(),
            "experiment failed: {}",
            command_line
        );
    }

    fn sweep_finished(&mut self, summary: &SweepSummary) {
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failures.len(),
            "sweep finished"
        );
    }
}
