//! flowrun — CLI driver for the dataflow engine.
//!
//! Usage:
//!   flowrun <plan.json> --input name=value    → run a plan
//!   flowrun <plan.json> --dry-run             → validate only
//!   flowrun <plan.json> --run-id my_run       → run with checkpoint/resume
//!   flowrun --resume [ID]                     → resume a previous run
//!   flowrun --list-plans                      → list available plans
//!   flowrun --list-runs                       → list resumable runs

use std::path::{Path, PathBuf};

use clap::Parser;
use flowrun_core::{
    ComponentRegistry, ExecutionResult, ExecutionTracer, FlowEngine, OutputMode, Plan, TraceLevel,
    ValueMap,
};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "flowrun",
    about = "Run dataflow plans",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Path to a plan JSON file (or a plan name from the plans directory)
    plan: Option<String>,

    /// Plan input as KEY=VALUE (value parsed as JSON, string fallback)
    #[arg(short, long = "input")]
    inputs: Vec<String>,

    /// Validate the plan without executing
    #[arg(long)]
    dry_run: bool,

    /// Output directory (default: results/<plan>_<timestamp>)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Run id for checkpoint/resume support
    #[arg(long)]
    run_id: Option<String>,

    /// Resume a previous run (the most recent one when no id is given)
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    resume: Option<String>,

    /// List available plans
    #[arg(long)]
    list_plans: bool,

    /// List resumable runs
    #[arg(long)]
    list_runs: bool,

    /// List registered components
    #[arg(long)]
    list_components: bool,

    /// Directory containing plan files
    #[arg(long, default_value = "plans")]
    plans_dir: PathBuf,

    /// Directory containing run state
    #[arg(long, default_value = "runs")]
    runs_dir: PathBuf,

    /// Directory containing composite definitions
    #[arg(long)]
    composites_dir: Option<PathBuf>,

    /// Suppress component output
    #[arg(short, long)]
    quiet: bool,

    /// Show component debug output
    #[arg(long)]
    debug: bool,
}

/// Parse `--input key=value` arguments. Values parse as JSON first so
/// `n=5` arrives as an integer; anything unparseable stays a string.
fn parse_input_args(args: &[String]) -> ValueMap {
    let mut inputs = ValueMap::new();
    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            eprintln!("Warning: invalid input format '{arg}', expected KEY=VALUE");
            continue;
        };
        let parsed = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        inputs.insert(key.to_string(), parsed);
    }
    inputs
}

fn available_plans(plans_dir: &Path) -> Vec<(PathBuf, Plan)> {
    let Ok(entries) = std::fs::read_dir(plans_dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();
    paths
        .into_iter()
        .filter_map(|path| Plan::from_file(&path).ok().map(|plan| (path, plan)))
        .collect()
}

fn find_plan_path(plans_dir: &Path, name: &str) -> Option<PathBuf> {
    available_plans(plans_dir)
        .into_iter()
        .find(|(path, plan)| {
            plan.name.as_deref() == Some(name)
                || path.file_stem().and_then(|s| s.to_str()) == Some(name)
        })
        .map(|(path, _)| path)
}

fn list_plans(plans_dir: &Path) -> i32 {
    let plans = available_plans(plans_dir);
    if plans.is_empty() {
        println!("No plans found in {}", plans_dir.display());
        return 0;
    }
    println!("Available plans:");
    for (path, plan) in plans {
        println!(
            "  {} - {}",
            plan.name
                .unwrap_or_else(|| path.file_stem().unwrap_or_default().to_string_lossy().into()),
            plan.description.unwrap_or_else(|| "No description".into())
        );
    }
    0
}

/// Resumable runs: directories under the runs dir containing a state file.
fn resumable_runs(runs_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(runs_dir) else {
        return Vec::new();
    };
    let mut runs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && !p.is_symlink() && p.join("state.jsonl").exists())
        .collect();
    runs.sort();
    runs
}

fn latest_resumable_run(runs_dir: &Path) -> Option<PathBuf> {
    resumable_runs(runs_dir)
        .into_iter()
        .max_by_key(|p| p.metadata().and_then(|m| m.modified()).ok())
}

fn list_runs(runs_dir: &Path) -> i32 {
    let runs = resumable_runs(runs_dir);
    if runs.is_empty() {
        println!("No resumable runs in {}", runs_dir.display());
        return 0;
    }
    println!("Resumable runs:");
    for run in runs {
        let name = run.file_name().unwrap_or_default().to_string_lossy();
        match read_run_results(&run) {
            Some(results) => {
                let plan = results
                    .get("plan_name")
                    .and_then(Value::as_str)
                    .unwrap_or("?");
                let success = results
                    .get("success")
                    .and_then(Value::as_bool)
                    .map(|s| if s { "ok" } else { "failed" })
                    .unwrap_or("?");
                println!("  {name} - plan={plan} status={success}");
            }
            None => println!("  {name} - in progress"),
        }
    }
    0
}

fn read_run_results(run_dir: &Path) -> Option<Value> {
    let text = std::fs::read_to_string(run_dir.join("results.json")).ok()?;
    serde_json::from_str(&text).ok()
}

fn print_result(result: &ExecutionResult) {
    println!();
    println!("{}", "=".repeat(60));
    println!(
        "EXECUTION {}",
        if result.success { "COMPLETE" } else { "FAILED" }
    );
    println!("{}", "=".repeat(60));
    println!("Duration: {:.2}s", result.duration_seconds);
    println!("Components executed: {}", result.stats.components_executed);
    println!("Steps executed: {}", result.stats.steps_executed);

    if !result.errors.is_empty() {
        println!("\nErrors: {}", result.errors.len());
        for err in &result.errors {
            let status = if err.recovered { "recovered" } else { "fatal" };
            println!("  [{status}] {}", err.message);
        }
    }

    if !result.returns.is_empty() {
        println!("\nReturns:");
        for (key, value) in &result.returns {
            match value {
                Value::Object(map) if map.contains_key("items") => {
                    let count = map
                        .get("items")
                        .and_then(Value::as_array)
                        .map(|a| a.len())
                        .unwrap_or(0);
                    println!("  {key}: {count} items");
                }
                Value::Array(items) => println!("  {key}: {} items", items.len()),
                Value::Object(map) => {
                    println!("  {key}: {:?}", map.keys().collect::<Vec<_>>())
                }
                other => {
                    let text = flowrun_core::display_value(other);
                    if text.len() > 50 {
                        println!("  {key}: {}...", &text[..50]);
                    } else {
                        println!("  {key}: {text}");
                    }
                }
            }
        }
    }

    // On failure, show the formatted error context for the failing step.
    if !result.success {
        if let Some(failed) = result.traces.iter().rev().find(|t| !t.success) {
            let mut tracer = ExecutionTracer::new(TraceLevel::Errors);
            tracer.traces = result.traces.clone();
            eprintln!("\n{}", tracer.format_error_context(failed));
        }
    }
}

fn save_results(output_dir: &Path, plan_name: &str, result: &ExecutionResult) {
    let document = json!({
        "plan_name": plan_name,
        "success": result.success,
        "duration_seconds": result.duration_seconds,
        "stats": result.stats,
        "returns": result.returns,
        "errors": result.errors,
    });
    let path = output_dir.join("results.json");
    match serde_json::to_string_pretty(&document) {
        Ok(text) => {
            if let Err(err) = std::fs::write(&path, text) {
                eprintln!("Warning: failed to save results: {err}");
            }
        }
        Err(err) => eprintln!("Warning: failed to serialize results: {err}"),
    }

    // Maintain a 'latest' symlink for easy access. Best-effort.
    #[cfg(unix)]
    {
        if let (Some(parent), Some(name)) = (output_dir.parent(), output_dir.file_name()) {
            let link = parent.join("latest");
            if link.is_symlink() {
                let _ = std::fs::remove_file(&link);
            }
            let _ = std::os::unix::fs::symlink(name, link);
        }
    }
}

async fn run_plan(cli: &Cli) -> i32 {
    // Resolve what to run: an explicit plan path/name, or a resumed run.
    let mut run_id = cli.run_id.clone();
    let mut output_dir = cli.output.clone();
    let mut plan_ref = cli.plan.clone();

    if let Some(resume) = &cli.resume {
        let run_dir = if resume.is_empty() {
            latest_resumable_run(&cli.runs_dir)
        } else {
            let dir = cli.runs_dir.join(resume);
            dir.join("state.jsonl").exists().then_some(dir)
        };
        let Some(run_dir) = run_dir else {
            eprintln!("No resumable run found in {}", cli.runs_dir.display());
            return 1;
        };
        let name = run_dir.file_name().unwrap_or_default().to_string_lossy();
        println!("Resuming run '{name}'");
        run_id = Some(name.to_string());
        output_dir = Some(run_dir.clone());
        if plan_ref.is_none() {
            plan_ref = read_run_results(&run_dir)
                .and_then(|r| r.get("plan_name").and_then(Value::as_str).map(String::from));
        }
    }

    let Some(plan_ref) = plan_ref else {
        eprintln!("No plan specified. Use --list-plans to see what is available.");
        return 1;
    };
    let plan_path = {
        let direct = PathBuf::from(&plan_ref);
        if direct.exists() {
            direct
        } else {
            match find_plan_path(&cli.plans_dir, &plan_ref) {
                Some(path) => path,
                None => {
                    eprintln!("Plan not found: {plan_ref}");
                    return 1;
                }
            }
        }
    };

    let mut engine = match &run_id {
        Some(id) => FlowEngine::persistent(Some(id.clone())),
        None => FlowEngine::new(),
    };
    if let Err(err) = engine.load_plan(plan_path.as_path()) {
        eprintln!("{err}");
        return 1;
    }

    let inputs = parse_input_args(&cli.inputs);
    if let Err(err) = engine.set_inputs(inputs) {
        eprintln!("{err}");
        return 1;
    }

    let missing = engine.missing_inputs();
    if !missing.is_empty() {
        eprintln!("Missing required inputs:");
        for (name, spec) in missing {
            let desc = if spec.description.is_empty() {
                String::new()
            } else {
                format!(" - {}", spec.description)
            };
            eprintln!("  {name} ({}){desc}", spec.value_type);
        }
        eprintln!("Provide inputs with: --input name=value");
        return 1;
    }

    let report = engine.validate();
    for warning in report.warnings() {
        eprintln!("{warning}");
    }
    if !report.valid {
        eprintln!("{}", report.format());
        return 1;
    }

    if cli.dry_run {
        println!("Validation passed. Dry run - skipping execution.");
        return 0;
    }

    let plan_name = engine
        .plan()
        .map(|p| p.display_name().to_string())
        .unwrap_or_default();
    let output_dir = output_dir.unwrap_or_else(|| {
        match &run_id {
            Some(id) => cli.runs_dir.join(id),
            None => {
                let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
                PathBuf::from("results").join(format!("{plan_name}_{timestamp}"))
            }
        }
    });
    if let Err(err) = std::fs::create_dir_all(&output_dir) {
        eprintln!("Cannot create output directory: {err}");
        return 1;
    }

    let output_mode = if cli.quiet {
        OutputMode::Quiet
    } else if cli.debug {
        OutputMode::Debug
    } else {
        OutputMode::Normal
    };

    println!("Executing plan '{plan_name}'...");
    let result = match engine.execute(Some(&output_dir), output_mode).await {
        Ok(result) => result,
        Err(err) => {
            eprintln!("{err}");
            return 1;
        }
    };

    print_result(&result);
    save_results(&output_dir, &plan_name, &result);
    println!("\nResults saved to: {}", output_dir.display());

    if result.success {
        0
    } else {
        1
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowrun=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    flowrun_components::ensure_builtins();
    if let Some(composites_dir) = &cli.composites_dir {
        let loaded =
            flowrun_core::discover_composites(ComponentRegistry::global(), composites_dir);
        if !loaded.is_empty() {
            tracing::info!("Registered composites: {loaded:?}");
        }
    }

    let code = if cli.list_plans {
        list_plans(&cli.plans_dir)
    } else if cli.list_runs {
        list_runs(&cli.runs_dir)
    } else if cli.list_components {
        println!("{}", ComponentRegistry::global().generate_docs(None));
        0
    } else {
        run_plan(&cli).await
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_args_parse_json_first() {
        let inputs = parse_input_args(&["n=5".into(), "s=hello".into(), "flag=true".into()]);
        assert_eq!(inputs.get("n"), Some(&json!(5)));
        assert_eq!(inputs.get("s"), Some(&json!("hello")));
        assert_eq!(inputs.get("flag"), Some(&json!(true)));
    }

    #[test]
    fn input_args_keep_value_with_equals() {
        let inputs = parse_input_args(&["expr=a=b".into()]);
        assert_eq!(inputs.get("expr"), Some(&json!("a=b")));
    }

    #[test]
    fn input_args_skip_malformed() {
        let inputs = parse_input_args(&["noequals".into()]);
        assert!(inputs.is_empty());
    }

    #[test]
    fn input_args_parse_lists() {
        let inputs = parse_input_args(&[r#"items=["a","b"]"#.into()]);
        assert_eq!(inputs.get("items"), Some(&json!(["a", "b"])));
    }
}
