mod cli;
mod error;
mod logging;

use crate::cli::{Cli, Command, Target};
use crate::error::{ErrorKind, Result};
use cachemeter_config::Config;
use cachemeter_quota::padding::PaddingState;
use cachemeter_quota::{
    CacheQuotaClient, IdleOperationManager, LocalQuotaAuthority, OriginMetadata, PersistenceType, QuotaClient,
};
use cachemeter_storage::StorageBackend;
use cachemeter_storage::backend::LocalBackend;
use clap::Parser;
use exn::ResultExt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:?}");
            return ExitCode::FAILURE;
        },
    };
    if let Err(e) = logging::init(&config.log) {
        eprintln!("{e:?}");
        return ExitCode::FAILURE;
    }
    match run(cli, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "Command failed");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli, config: &Config) -> Result<()> {
    let root = match cli.storage_root {
        Some(root) => root,
        None => config.storage_root().or_raise(|| ErrorKind::Config)?,
    };
    let root = std::path::absolute(&root).or_raise(|| ErrorKind::Storage)?;
    let backend = LocalBackend::new("local", &root).or_raise(|| ErrorKind::Storage)?;
    tracing::debug!(backend = backend.name(), root = %backend.root().display(), "Opened storage root");
    let client = CacheQuotaClient::new(
        Arc::new(backend),
        Arc::new(LocalQuotaAuthority::new()),
        Arc::new(IdleOperationManager::new()),
        config.client_options(),
    );

    match cli.command {
        Command::Usage { target, init } => {
            let (origin, persistence) = resolve(&target)?;
            let canceled = Arc::new(AtomicBool::new(false));
            let interrupt = tokio::spawn(cancel_on_interrupt(canceled.clone()));
            let usage = if init {
                client.init_origin(persistence, &origin, &canceled).await
            } else {
                client.get_usage_for_origin(persistence, &origin, &canceled).await
            };
            interrupt.abort();
            let usage = match usage {
                Err(e) if e.is_abort() => return Err(e).or_raise(|| ErrorKind::Interrupted),
                usage => usage.or_raise(|| ErrorKind::Quota)?,
            };
            println!("database: {}", usage.database_usage());
            println!("file: {}", usage.file_usage());
            println!("total: {}", usage.total());
        },
        Command::Padding(target) => {
            let dir = directory(&client, &target)?;
            match client.padding_state(&dir).await.or_raise(|| ErrorKind::Quota)? {
                PaddingState::Absent => println!("absent"),
                PaddingState::Present(padding) => println!("{padding}"),
                PaddingState::TemporaryPresent => println!("unknown (uncommitted write pending)"),
            }
        },
        Command::RestorePadding(target) => {
            let dir = directory(&client, &target)?;
            let padding = client.restore_padding_file_from_records(&dir).await.or_raise(|| ErrorKind::Quota)?;
            println!("{padding}");
        },
        Command::WipePadding(target) => {
            let (origin, persistence) = resolve(&target)?;
            let dir = client.cache_directory(persistence, &origin).or_raise(|| ErrorKind::Quota)?;
            client.wipe_padding_file(&origin, &dir).await.or_raise(|| ErrorKind::Quota)?;
        },
        Command::Upgrade(target) => {
            let dir = directory(&client, &target)?;
            client.upgrade_storage_from_2_0_to_2_1(&dir).await.or_raise(|| ErrorKind::Quota)?;
        },
    }
    Ok(())
}

fn resolve(target: &Target) -> Result<(OriginMetadata, PersistenceType)> {
    let persistence = PersistenceType::from(target.persistence);
    let origin = OriginMetadata::new(target.origin.as_str(), persistence).or_raise(|| ErrorKind::Origin)?;
    Ok((origin, persistence))
}

fn directory(client: &CacheQuotaClient, target: &Target) -> Result<PathBuf> {
    let (origin, persistence) = resolve(target)?;
    client.cache_directory(persistence, &origin).or_raise(|| ErrorKind::Quota)
}

async fn cancel_on_interrupt(canceled: Arc<AtomicBool>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("Interrupted, abandoning usage walk");
        canceled.store(true, Ordering::Release);
    }
}
