use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sweep", version = "0.3.0", about = "Solver parameter sweeps and cache overhead analysis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every parameter combination of an experiment through the solver.
    Run {
        experiment: String,
        #[arg(long, default_value = "experiment")]
        experiment_dir: PathBuf,
        #[arg(long, default_value = sweep_runner::DEFAULT_SOLVER)]
        solver: String,
        #[arg(long)]
        working_dir: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show the parameter axes and combination count of an experiment.
    Describe {
        experiment: String,
        #[arg(long, default_value = "experiment")]
        experiment_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Compute cache overhead percentiles from a results CSV.
    Analyze {
        input_csv: PathBuf,
        #[arg(long, short, default_value = sweep_analysis::DEFAULT_OUTPUT)]
        output: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            experiment,
            experiment_dir,
            solver,
            working_dir,
            dry_run,
            json,
        } => {
            let path = sweep_runner::resolve_experiment_path(&experiment, &experiment_dir);
            let spec = sweep_runner::load_experiment(&path)?;
            if !dry_run {
                check_solver(&solver, working_dir.as_deref())?;
            }
            let mut process = sweep_runner::ProcessSolver::new(solver);
            if let Some(dir) = &working_dir {
                process = process.with_working_dir(dir);
            }
            let mut orchestrator =
                sweep_runner::Orchestrator::new(process, sweep_runner::TracingReporter)
                    .dry_run(dry_run);
            let summary = orchestrator.run(&spec)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "experiment": path.display().to_string(),
                    "sweep": sweep_summary_to_json(&summary),
                })));
            }
            print_sweep_summary(&path, &summary);
        }
        Commands::Describe {
            experiment,
            experiment_dir,
            json,
        } => {
            let path = sweep_runner::resolve_experiment_path(&experiment, &experiment_dir);
            let spec = sweep_runner::load_experiment(&path)?;
            if json {
                let parameters: Vec<Value> = spec
                    .parameters
                    .iter()
                    .map(|p| {
                        json!({
                            "name": p.name,
                            "values": p.values.iter().map(|v| v.to_string()).collect::<Vec<_>>(),
                            "swept": p.is_list,
                        })
                    })
                    .collect();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "experiment": path.display().to_string(),
                    "parameters": parameters,
                    "combinations": spec.combination_count(),
                })));
            }
            println!("experiment: {}", path.display());
            for p in &spec.parameters {
                let values: Vec<String> = p.values.iter().map(|v| v.to_string()).collect();
                if p.is_list {
                    println!("{}: {} values [{}]", p.name, values.len(), values.join(", "));
                } else {
                    println!("{}: {}", p.name, values.join(""));
                }
            }
            println!("combinations: {}", spec.combination_count());
        }
        Commands::Analyze {
            input_csv,
            output,
            json,
        } => return analyze_csv(&input_csv, &output, json, &mut std::io::stdout().lock()),
    }
    Ok(None)
}

fn analyze_csv(input: &Path, output: &Path, json: bool, out: &mut impl Write) -> Result<Option<Value>> {
    let data = sweep_analysis::read_measurements(input)?;
    let report = sweep_analysis::analyze(&data.rows);
    let Some(overall) = report.overall else {
        if json {
            return Ok(Some(json!({
                "ok": true,
                "command": "analyze",
                "result": Value::Null,
                "skipped_rows": data.skipped_rows,
                "skipped_groups": report.skipped.len(),
            })));
        }
        writeln!(
            out,
            "Could not calculate overhead. Make sure the data contains both cached and non-cached (NONE) experiments."
        )?;
        return Ok(None);
    };
    sweep_analysis::write_records(output, &report.records)?;
    if json {
        let by_agents: Vec<Value> = report
            .by_agent_count
            .iter()
            .map(|(n, p)| {
                let mut v = percentiles_to_json(p);
                v["nagents"] = json!(n);
                v
            })
            .collect();
        return Ok(Some(json!({
            "ok": true,
            "command": "analyze",
            "result": percentiles_to_json(&overall),
            "by_agent_count": by_agents,
            "groups": report.records.len(),
            "skipped_rows": data.skipped_rows,
            "skipped_groups": report.skipped.len(),
            "output": output.display().to_string(),
        })));
    }
    writeln!(out, "\nCache Overhead Analysis Results:")?;
    writeln!(out, "P0  (minimum) overhead: {:.2}%", overall.p0)?;
    writeln!(out, "P50 (median)  overhead: {:.2}%", overall.p50)?;
    writeln!(out, "P99           overhead: {:.2}%", overall.p99)?;
    writeln!(out, "\nBy agent count:")?;
    for (n, p) in &report.by_agent_count {
        writeln!(
            out,
            "nagents={:<6} P0: {:.2}%  P50: {:.2}%  P99: {:.2}%",
            n, p.p0, p.p50, p.p99
        )?;
    }
    if data.skipped_rows > 0 {
        writeln!(out, "\nskipped_rows: {}", data.skipped_rows)?;
    }
    writeln!(out, "\nDetailed results saved to: {}", output.display())?;
    Ok(None)
}

fn check_solver(solver: &str, working_dir: Option<&Path>) -> Result<()> {
    let path = Path::new(solver);
    if path.components().count() <= 1 {
        // bare program name, resolved through PATH at spawn time
        return Ok(());
    }
    let resolved = match working_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    };
    if !resolved.is_file() {
        return Err(anyhow!("solver executable not found: {}", resolved.display()));
    }
    Ok(())
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Describe { json, .. }
        | Commands::Analyze { json, .. } => *json,
    }
}

fn sweep_summary_to_json(summary: &sweep_runner::SweepSummary) -> Value {
    json!({
        "total": summary.total,
        "succeeded": summary.succeeded,
        "failed": summary.failures.len(),
        "dry_run": summary.dry_run,
        "failures": summary.failures.iter().map(|f| json!({
            "index": f.index,
            "command": f.command_line,
            "exit_code": f.exit_code,
        })).collect::<Vec<_>>(),
    })
}

fn percentiles_to_json(p: &sweep_analysis::Percentiles) -> Value {
    json!({
        "p0": p.p0,
        "p50": p.p50,
        "p99": p.p99,
    })
}

fn print_sweep_summary(path: &Path, summary: &sweep_runner::SweepSummary) {
    println!("experiment: {}", path.display());
    println!("combinations: {}", summary.total);
    if summary.dry_run {
        println!("dry_run: true");
        return;
    }
    println!("succeeded: {}", summary.succeeded);
    println!("failed: {}", summary.failures.len());
    for f in &summary.failures {
        let code = f
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string());
        println!("  [{}] exit={} {}", f.index, code, f.command_line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sweep_cli_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    #[test]
    fn cli_parses_analyze_defaults() {
        let cli = Cli::try_parse_from(["sweep", "analyze", "result/result.csv"]).expect("parse");
        match cli.command {
            Commands::Analyze { input_csv, output, json } => {
                assert_eq!(input_csv, PathBuf::from("result/result.csv"));
                assert_eq!(output, PathBuf::from("overhead_analysis.csv"));
                assert!(!json);
            }
            _ => panic!("expected analyze"),
        }
    }

    #[test]
    fn cli_parses_run_options() {
        let cli = Cli::try_parse_from([
            "sweep",
            "run",
            "overhead",
            "--dry-run",
            "--solver",
            "./bin/solver",
        ])
        .expect("parse");
        match cli.command {
            Commands::Run {
                experiment,
                experiment_dir,
                solver,
                dry_run,
                ..
            } => {
                assert_eq!(experiment, "overhead");
                assert_eq!(experiment_dir, PathBuf::from("experiment"));
                assert_eq!(solver, "./bin/solver");
                assert!(dry_run);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn bare_solver_names_skip_the_existence_check() {
        assert!(check_solver("CAL-MAPF", None).is_ok());
        let err = check_solver("./no/such/solver", None).expect_err("missing solver");
        assert!(err.to_string().contains("solver executable not found"));
    }

    #[test]
    fn analyze_without_baseline_prints_diagnostic_and_writes_nothing() {
        let root = scratch("nobase");
        let input = root.join("result.csv");
        let output = root.join("overhead.csv");
        fs::write(
            &input,
            "map_name,cache,goal_generation_type,ngoals,nagents,elapsed_time\n\
             a.map,LRU,MK,10,5,12.0\n\
             a.map,FIFO,MK,10,5,13.0\n",
        )
        .expect("write input");

        let mut out = Vec::new();
        let payload = analyze_csv(&input, &output, false, &mut out).expect("analyze");
        let text = String::from_utf8(out).expect("utf8");
        assert!(payload.is_none());
        assert!(text.contains("Could not calculate overhead"), "{}", text);
        assert!(!output.exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn analyze_prints_overall_and_per_agent_percentiles() {
        let root = scratch("report");
        let input = root.join("result.csv");
        let output = root.join("overhead.csv");
        fs::write(
            &input,
            "map_name,cache,goal_generation_type,ngoals,nagents,elapsed_time\n\
             a.map,NONE,MK,10,5,10.0\n\
             a.map,LRU,MK,10,5,12.0\n\
             a.map,NONE,MK,10,20,20.0\n\
             a.map,LRU,MK,10,20,25.0\n",
        )
        .expect("write input");

        let mut out = Vec::new();
        let payload = analyze_csv(&input, &output, false, &mut out).expect("analyze");
        let text = String::from_utf8(out).expect("utf8");
        assert!(payload.is_none());
        assert!(text.contains("P0  (minimum) overhead: 20.00%"), "{}", text);
        assert!(text.contains("P99           overhead: 24.95%"), "{}", text);
        assert!(text.contains("nagents=5      P0: 20.00%"), "{}", text);
        assert!(text.contains("nagents=20     P0: 25.00%"), "{}", text);
        assert!(output.is_file());

        let payload = analyze_csv(&input, &output, true, &mut Vec::new())
            .expect("analyze json")
            .expect("json payload");
        assert_eq!(payload["groups"], json!(2));
        assert_eq!(payload["by_agent_count"][1]["nagents"], json!(20));
        let _ = fs::remove_dir_all(root);
    }
}
