use crate::{
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use commands::Commands;
use connectors::adapter::Adapter;
use engine_config::settings::MigrationJobConfig;
use engine_core::state::{StateStore, sled_store::SledStateStore};
use engine_processing::{check::algorithm::CheckAlgorithmRegistry, importer::ImporterSettings};
use engine_runtime::{
    error::JobError,
    job::{JobStatusReport, MigrationJob},
    registry::JobRegistry,
    source::AdapterSource,
};
use model::core::identifiers::{JobId, ShardItem};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(name = "shardmig", version = "0.1.0", about = "Online sharded data migration")]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "State store directory (defaults to ~/.shardmig/state)"
    )]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => ExitCode::Success,
        Err(CliError::ShutdownRequested) => ExitCode::ShutdownRequested,
        Err(err) => {
            error!(error = %err, "Command failed");
            ExitCode::GeneralError
        }
    };
    std::process::exit(code.as_i32());
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let state_dir = cli.state_dir;
    let registry = JobRegistry::new();

    match cli.command {
        Commands::Validate { config } => validate(&config)?,
        Commands::Migrate { config } => {
            let store = open_state_store(state_dir)?;
            let job = open_job(&registry, &config, store).await?;
            migrate(&job).await?;
        }
        Commands::Jobs => {
            let store = open_state_store(state_dir)?;
            for job_id in store.list_jobs().await? {
                println!("{job_id}");
            }
        }
        Commands::Status { job, json } => {
            let store = open_state_store(state_dir)?;
            let report = JobStatusReport::load(store.as_ref(), &JobId::new(job.clone())).await?;
            if report.items.is_empty() {
                return Err(CliError::UnknownJob(job));
            }
            output::print_status(&report, json)?;
        }
        Commands::Check { config, json } => {
            let store = open_state_store(state_dir)?;
            let job = open_job(&registry, &config, store).await?;
            let shutdown = ShutdownCoordinator::new(CancellationToken::new());
            shutdown.register_handlers();
            let result = job.check(&shutdown.cancel_token()).await;
            if shutdown.is_shutdown_requested() {
                return Err(CliError::ShutdownRequested);
            }
            output::print_check(&result?, json)?;
        }
        Commands::Commit { config } => {
            let store = open_state_store(state_dir)?;
            let job = open_job(&registry, &config, store).await?;
            commit(&registry, &job).await?;
            println!("Job committed");
        }
        Commands::Rollback { config } => {
            let store = open_state_store(state_dir)?;
            let job = open_job(&registry, &config, store).await?;
            rollback(&registry, &job).await?;
            println!("Job rolled back");
        }
    }

    Ok(())
}

fn validate(path: &str) -> Result<(), CliError> {
    let config = MigrationJobConfig::load_validated(path)?;
    CheckAlgorithmRegistry::create(
        &config.consistency_check.name,
        &config.consistency_check.props,
    )
    .map_err(JobError::from)?;
    ImporterSettings::from_config(&config.pipeline).map_err(JobError::from)?;

    info!(
        shard_items = config.shard_items.len(),
        tables = config.tables.len(),
        check_algorithm = %config.consistency_check.name,
        "Configuration is valid"
    );
    println!("Configuration '{path}' is valid");
    Ok(())
}

/// Runs the job until every pipeline returns, stopping it on Ctrl+C.
async fn migrate(job: &MigrationJob) -> Result<(), CliError> {
    let shutdown = ShutdownCoordinator::new(CancellationToken::new());
    shutdown.register_handlers();
    let cancel = shutdown.cancel_token();

    job.start().await?;
    println!("Started job '{}'", job.job_id());

    while job.is_running() {
        tokio::select! {
            _ = cancel.cancelled() => {
                job.stop().await?;
                return Err(CliError::ShutdownRequested);
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }
    }

    let statuses = job.wait().await?;
    output::print_statuses(&statuses);
    let metrics = job.metrics();
    info!(
        job_id = %job.job_id(),
        records = metrics.records_received,
        applied = metrics.records_applied,
        batches = metrics.batches_processed,
        retries = metrics.retry_count,
        "Migration job returned"
    );
    Ok(())
}

/// Builds the job and registers it for the lifetime of the command.
async fn open_job(
    registry: &JobRegistry,
    path: &str,
    store: Arc<dyn StateStore>,
) -> Result<Arc<MigrationJob>, CliError> {
    let job = connect_job(path, store).await?;
    Ok(registry.register(job)?)
}

async fn commit(registry: &JobRegistry, job: &MigrationJob) -> Result<(), CliError> {
    job.commit().await?;
    registry.remove(job.job_id());
    Ok(())
}

async fn rollback(registry: &JobRegistry, job: &MigrationJob) -> Result<(), CliError> {
    job.rollback().await?;
    registry.remove(job.job_id());
    Ok(())
}

/// Connects the target and every shard item source named in the config and
/// builds the job over the given state store.
async fn connect_job(path: &str, store: Arc<dyn StateStore>) -> Result<MigrationJob, CliError> {
    let config = MigrationJobConfig::load_validated(path)?;
    if config.job_id.is_none() {
        return Err(CliError::Unexpected(format!(
            "'{path}' has no job-id; a job can only be managed under a fixed id"
        )));
    }

    let target = Adapter::connect(config.target.format, &config.target.url).await?;
    let mut builder = MigrationJob::builder(config.clone())
        .state_store(store)
        .target(target.target(), target.reader());
    for (idx, item) in config.shard_items.iter().enumerate() {
        let source = Adapter::connect(item.source.format, &item.source.url).await?;
        builder = builder.item_source(idx as ShardItem, Arc::new(AdapterSource::new(source)));
    }
    Ok(builder.build()?)
}

fn open_state_store(state_dir: Option<PathBuf>) -> Result<Arc<dyn StateStore>, CliError> {
    let path = match state_dir {
        Some(path) => path,
        None => dirs::home_dir()
            .ok_or_else(|| CliError::Unexpected("Could not determine home directory".into()))?
            .join(".shardmig/state"),
    };
    let store = SledStateStore::open(&path).map_err(|err| {
        CliError::Unexpected(format!(
            "Failed to open state store at {}: {err}",
            path.display()
        ))
    })?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"{
        "job-id": "j-cli",
        "target": { "format": "memory" },
        "shard-items": [{ "source": { "format": "memory" }, "tables": ["t_order"] }],
        "tables": [{ "source": "t_order", "primary-keys": ["id"] }]
    }"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn validate_accepts_complete_config() {
        let file = write_config(CONFIG);
        assert!(validate(file.path().to_str().unwrap()).is_ok());
    }

    #[test]
    fn validate_rejects_unknown_check_algorithm() {
        let file = write_config(&CONFIG.replace(
            r#""tables": [{ "source""#,
            r#""consistency-check": { "name": "CRC32_MATCH" }, "tables": [{ "source""#,
        ));
        let err = validate(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, CliError::Job(JobError::Algorithm(_))));
    }

    #[tokio::test]
    async fn status_reads_jobs_from_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_config(CONFIG);
        let store = open_state_store(Some(dir.path().to_path_buf())).unwrap();

        let job = connect_job(file.path().to_str().unwrap(), store.clone())
            .await
            .unwrap();
        job.start().await.unwrap();
        job.stop().await.unwrap();

        assert_eq!(store.list_jobs().await.unwrap(), vec!["j-cli".to_string()]);
        let report = JobStatusReport::load(store.as_ref(), &JobId::new("j-cli"))
            .await
            .unwrap();
        assert_eq!(report.items.len(), 1);
    }

    #[tokio::test]
    async fn rollback_releases_the_registered_job() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_config(CONFIG);
        let path = file.path().to_str().unwrap();
        let store = open_state_store(Some(dir.path().to_path_buf())).unwrap();
        let registry = JobRegistry::new();

        let job = open_job(&registry, path, store.clone()).await.unwrap();
        assert!(matches!(
            open_job(&registry, path, store.clone()).await,
            Err(CliError::Job(JobError::AlreadyRegistered(_)))
        ));
        assert_eq!(registry.job_ids(), vec![JobId::new("j-cli")]);

        let err = commit(&registry, &job).await.unwrap_err();
        assert!(matches!(err, CliError::Job(JobError::NotCompleted { .. })));
        assert_eq!(registry.len(), 1);

        rollback(&registry, &job).await.unwrap();
        assert!(registry.is_empty());
    }
}
