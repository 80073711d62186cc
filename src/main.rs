use anyhow::{Context, Result};
use pipeline_runner::cache::{CacheStore, InMemoryCacheStore};
use pipeline_runner::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use pipeline_runner::cli::output::*;
use pipeline_runner::cli::{Cli, Command};
use pipeline_runner::core::config::PipelineSpec;
use pipeline_runner::core::{RunStatus, RunSummary, TaskGraph};
use pipeline_runner::execution::{ExecutionEngine, ExecutionEvent, RunCanceller};
use pipeline_runner::persistence::{InMemoryPersistence, PersistenceBackend};
use pipeline_runner::runtime::{DockerCliRuntime, RuntimeConfig};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Exit code when the pipeline spec could not be loaded or built and nothing ran
const EXIT_INVALID_SPEC: u8 = 2;

/// Environment variable consulted for the log filter
const LOG_ENV: &str = "PIPELINE_LOG";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::from_args();

    // Initialize logging; stdout is reserved for the run report
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    // Execute command
    let code = match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => {
            list_pipelines(cmd).await?;
            ExitCode::SUCCESS
        }
        Command::History(cmd) => {
            show_history(cmd).await?;
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}

/// Load a spec file and build its graph, applying parameter overrides
fn load_graph(file: &str, overrides: &[(String, String)]) -> Result<(PipelineSpec, TaskGraph)> {
    let mut spec = PipelineSpec::from_file(file).context("Failed to load pipeline spec")?;
    for (key, value) in overrides {
        spec.parameters.insert(key.clone(), value.clone());
    }

    let pipeline = spec.load()?;
    let graph = TaskGraph::build(&pipeline)?;
    Ok((spec, graph))
}

async fn open_history(no_history: bool) -> Result<Arc<dyn PersistenceBackend>> {
    if no_history {
        return Ok(Arc::new(InMemoryPersistence::new()));
    }

    #[cfg(feature = "sqlite")]
    {
        let store = pipeline_runner::persistence::SqliteRunStore::with_default_path().await?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        Ok(Arc::new(InMemoryPersistence::new()))
    }
}

async fn open_cache(no_cache: bool) -> Arc<dyn CacheStore> {
    if no_cache {
        return Arc::new(InMemoryCacheStore::new());
    }

    #[cfg(feature = "sqlite")]
    {
        match pipeline_runner::cache::SqliteCacheStore::with_default_path().await {
            Ok(store) => return Arc::new(store),
            Err(e) => warn!("Cache database unavailable, caching in memory only: {:#}", e),
        }
    }

    Arc::new(InMemoryCacheStore::new())
}

async fn run_pipeline(cmd: &RunCommand) -> Result<ExitCode> {
    let (_, graph) = match load_graph(&cmd.file, &cmd.param) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{} Failed to load pipeline:", CROSS);
            eprintln!("  {}", style(format!("{:#}", e)).red());
            return Ok(ExitCode::from(EXIT_INVALID_SPEC));
        }
    };
    let graph = Arc::new(graph);

    println!(
        "{} Loaded pipeline: {} ({} tasks)",
        INFO,
        style(&graph.pipeline().name).bold(),
        graph.len()
    );

    let history = open_history(cmd.no_history).await?;
    let cache = open_cache(cmd.no_cache).await;

    let runtime = DockerCliRuntime::new(RuntimeConfig::new().with_binary(&cmd.runtime_binary));
    let engine = ExecutionEngine::with_cache_store(runtime, cmd.engine_options(), cache);

    // Stream events above the progress bar
    let progress = if cmd.json {
        indicatif::ProgressBar::hidden()
    } else {
        create_progress_bar(graph.len())
    };
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        match &event {
            ExecutionEvent::TaskCached { .. }
            | ExecutionEvent::TaskSucceeded { .. }
            | ExecutionEvent::TaskFailed { .. }
            | ExecutionEvent::TaskSkipped { .. }
            | ExecutionEvent::TaskCancelled { .. } => bar.inc(1),
            ExecutionEvent::TaskReady { .. } => return,
            _ => {}
        }
        bar.println(format_execution_event(&event));
    });

    // Ctrl-C cancels the run; the report is still printed and saved
    let canceller = RunCanceller::new();
    let on_signal = canceller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let summary = engine.execute_with_canceller(graph, &canceller).await;
    progress.finish_and_clear();

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!();
        print!("{}", format_run_summary(&summary));
    }

    if !cmd.no_history {
        match history.save_run(&summary).await {
            Ok(()) => println!(
                "\n{} Run saved to history (ID: {})",
                INFO,
                style(&summary.run_id.to_string()[..8]).dim()
            ),
            Err(e) => error!("Failed to save run history: {:#}", e),
        }
    }

    Ok(exit_code(&summary))
}

fn exit_code(summary: &RunSummary) -> ExitCode {
    match summary.status {
        RunStatus::Succeeded => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<ExitCode> {
    println!("{} Validating pipeline...", INFO);

    match load_graph(&cmd.file, &[]) {
        Ok((spec, graph)) => {
            let pipeline = graph.pipeline();
            println!("{} Pipeline specification is valid!", CHECK);
            println!("  Name: {}", style(&pipeline.name).bold());
            println!("  Tasks: {}", style(graph.len()).cyan());
            println!("  Executors: {}", style(pipeline.executors.len()).cyan());
            println!(
                "  Cacheable tasks: {}",
                style(pipeline.cacheable_tasks()).cyan()
            );
            println!("  Execution order:");
            for (position, &id) in graph.topological_order().iter().enumerate() {
                let node = graph.node(id);
                println!(
                    "    {}. {} {}",
                    position + 1,
                    style(node.name()).bold(),
                    style(format!("[{}]", node.executor.kind.name())).dim()
                );
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&spec)?;
                println!("\n{}", json);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            Ok(ExitCode::from(EXIT_INVALID_SPEC))
        }
    }
}

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = open_history(false).await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    if cmd.json {
        let mut json_data = Vec::new();
        for pipeline in &pipelines {
            let runs = store.list_runs(pipeline).await?;
            json_data.push(serde_json::json!({
                "name": pipeline,
                "run_count": runs.len(),
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Pipelines in history:", INFO);

    for pipeline_name in &pipelines {
        if cmd.with_counts {
            let runs = store.list_runs(pipeline_name).await?;
            let succeeded = runs.iter().filter(|r| r.status == RunStatus::Succeeded).count();
            let failed = runs
                .iter()
                .filter(|r| matches!(r.status, RunStatus::Failed | RunStatus::PartiallyFailed))
                .count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(pipeline_name).bold(),
                style(runs.len()).cyan(),
                style(succeeded).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_history(false).await?;

    // A single run's full report
    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) if cmd.json => println!("{}", serde_json::to_string_pretty(&summary)?),
            Some(summary) => print!("{}", format_run_summary(&summary)),
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let mut runs = match &cmd.pipeline {
        Some(pipeline_name) => store.list_runs(pipeline_name).await?,
        None => {
            let mut all = Vec::new();
            for pipeline in store.list_pipelines().await? {
                all.extend(store.list_runs(&pipeline).await?);
            }
            all
        }
    };
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs.truncate(cmd.limit);

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for record in &runs {
            println!("  {}", format_run_record(record));
        }
    }

    Ok(())
}
