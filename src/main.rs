use anyhow::{bail, Result};
use clap::Parser;
use role_bench::core::cli::{Cli, Commands};
use role_bench::core::config::{results_dir_from_env, AppConfig};
use role_bench::infrastructure::llm::OpenRouterClient;
use role_bench::infrastructure::logging::init_logging;
use role_bench::services::catalog::Catalog;
use role_bench::services::manager::{JobManager, RunRequest};
use role_bench::services::report;
use role_bench::services::status::JobState;
use role_bench::services::store::ResultsStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("role-bench")?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            models,
            judge_model,
            scenarios,
            roles,
            iterations,
            temperature,
            judge_temperature,
            max_tokens,
            catalog,
        } => {
            let config = AppConfig::from_env()?;
            let catalog = match catalog {
                Some(path) => Catalog::from_file(&path)?,
                None => Catalog::builtin(),
            };

            let models = if models.is_empty() {
                vec![
                    config.defaults.model_one.clone(),
                    config.defaults.model_two.clone(),
                ]
            } else {
                models
            };
            let request = RunRequest {
                models,
                judge_model: judge_model.unwrap_or_else(|| config.defaults.judge_model.clone()),
                scenario_ids: if scenarios.is_empty() {
                    catalog.scenario_ids()
                } else {
                    scenarios
                },
                role_ids: if roles.is_empty() {
                    catalog.role_ids()
                } else {
                    roles
                },
                num_iterations: iterations.unwrap_or(config.defaults.num_iterations),
                temperature: temperature.unwrap_or(config.defaults.temperature),
                judge_temperature: judge_temperature.unwrap_or(config.defaults.judge_temperature),
                max_tokens: max_tokens.unwrap_or(config.defaults.max_tokens),
            };

            let client = Arc::new(OpenRouterClient::new(config.api_key, config.base_url));
            let manager = JobManager::new(client, catalog, ResultsStore::new(config.results_dir));
            run_and_wait(&manager, request).await
        }
        Commands::List => {
            let store = ResultsStore::new(results_dir_from_env());
            let summaries = store.list()?;
            if summaries.is_empty() {
                println!("No experiment runs found.");
                return Ok(());
            }
            for summary in summaries {
                println!(
                    "{}  {}  {} responses  ({})",
                    summary.run_id, summary.timestamp, summary.num_responses, summary.filename
                );
            }
            Ok(())
        }
        Commands::Export { run_id, output } => {
            let store = ResultsStore::new(results_dir_from_env());
            let path = store.find(&run_id)?;
            let run = ResultsStore::load_path(&path)?;
            let output = output.unwrap_or_else(|| default_export_path(&path, &run.run_id));
            let rows = report::flatten_run(&run).len();
            report::write_csv(&run, &output)?;
            println!("Exported {} rows to {}", rows, output.display());
            Ok(())
        }
    }
}

fn default_export_path(run_file: &std::path::Path, run_id: &str) -> PathBuf {
    let prefix: String = run_id.chars().take(8).collect();
    run_file.with_file_name(format!("analysis_{}.csv", prefix))
}

/// Launch the job, relay progress, and block until it reaches a
/// terminal state. Ctrl-C turns into a cooperative stop request.
async fn run_and_wait(manager: &JobManager, request: RunRequest) -> Result<()> {
    let job_id = manager.start(request)?;
    info!("任务已启动: {}", job_id);

    {
        let manager = manager.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("收到 Ctrl-C，请求停止实验...");
                if let Err(e) = manager.stop(&job_id) {
                    warn!("停止请求失败: {}", e);
                }
            }
        });
    }

    let mut last_message = String::new();
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let Some(status) = manager.status(&job_id) else {
            bail!("job {} vanished from the status registry", job_id);
        };

        if status.message != last_message {
            info!("[{:>3}%] {}", status.progress, status.message);
            last_message = status.message.clone();
        }
        if status.state.is_active() {
            continue;
        }

        match status.state {
            JobState::Completed => {
                if let Some(output) = &status.output_file {
                    println!("Results saved to {}", output);
                }
                if let Some(run_id) = &status.run_id {
                    let run = manager.store().load(run_id)?;
                    println!("\nScenario             | Role                 | Model                | Average");
                    for line in report::summary_lines(&run) {
                        println!("{}", line);
                    }
                }
                return Ok(());
            }
            JobState::Stopped => {
                info!("实验已被用户停止");
                if let Some(output) = &status.output_file {
                    println!("Partial results saved to {}", output);
                }
                return Ok(());
            }
            JobState::Error => {
                let cause = status.error.unwrap_or_else(|| status.message.clone());
                if let Some(output) = &status.output_file {
                    println!("Partial results saved to {}", output);
                }
                bail!("experiment failed: {}", cause);
            }
            // is_active() already filtered these out.
            JobState::Initializing | JobState::Running | JobState::Stopping => unreachable!(),
        }
    }
}
