mod cli;
mod error;

use crate::cli::{Cli, Command, DatabaseRef, SettingsArgs, TableArgs};
use crate::error::{ErrorKind, Result, request};
use clap::Parser;
use exn::{OptionExt, ResultExt};
use serde::Serialize;
use sqlhub_cache::{CacheHandle, DisabledCache, MemoryCache};
use sqlhub_config::{Config, StorageConfig};
use sqlhub_core::{Hub, Settings, TableRequest, Upload};
use sqlhub_metadata::{Database, Repository};
use sqlhub_storage::BackendHandle;
use sqlhub_storage::backend::LocalBackend;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!("{err:?}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let storage = storage(&config.storage).await?;
    let db = Database::connect(&config.metadata.path).await.or_raise(|| ErrorKind::Metadata)?;
    let cache: CacheHandle = if config.cache.enabled {
        Arc::new(MemoryCache::new(config.cache.max_entries))
    } else {
        Arc::new(DisabledCache)
    };
    let hub = Hub::new(storage, Repository::from(&db), cache)
        .with_limits(config.limits.clone())
        .with_cache_ttl(config.cache.ttl());

    let result = dispatch(&hub, cli.viewer.as_deref(), cli.command).await;
    db.close().await;
    result
}

async fn storage(config: &StorageConfig) -> Result<BackendHandle> {
    match config {
        StorageConfig::Local { root } => {
            let backend = LocalBackend::new("local", root).or_raise(|| ErrorKind::Storage)?;
            Ok(Arc::new(backend))
        },
        #[cfg(feature = "s3")]
        StorageConfig::S3 {
            bucket,
            prefix,
            region,
            endpoint,
            key_id,
            key_secret,
        } => {
            let backend = sqlhub_storage::backend::S3Backend::new(
                "s3",
                bucket,
                prefix.clone(),
                region,
                endpoint.clone(),
                key_id,
                key_secret,
            )
            .await
            .or_raise(|| ErrorKind::Storage)?;
            Ok(Arc::new(backend))
        },
        #[cfg(not(feature = "s3"))]
        StorageConfig::S3 { .. } => exn::bail!(ErrorKind::Usage("this build has no S3 support")),
    }
}

fn signed_in(viewer: Option<&str>) -> Result<&str> {
    viewer.ok_or_raise(|| ErrorKind::Usage("this command needs a user, pass --as"))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).or_raise(|| ErrorKind::File("standard output".into()))?;
    println!("{json}");
    Ok(())
}

async fn read_text(path: Option<&Path>) -> Result<Option<String>> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map(Some)
            .or_raise(|| ErrorKind::File(path.display().to_string())),
        None => Ok(None),
    }
}

async fn dispatch(hub: &Hub, viewer: Option<&str>, command: Command) -> Result<()> {
    match command {
        Command::Upload {
            file,
            name,
            public,
            description,
            readme,
        } => {
            let owner = signed_in(viewer)?;
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .ok_or_raise(|| ErrorKind::Usage("cannot tell the database name from the file, pass --name"))?,
            };
            let data = tokio::fs::read(&file)
                .await
                .or_raise(|| ErrorKind::File(file.display().to_string()))?;
            let readme = read_text(readme.as_deref()).await?.unwrap_or_default();
            let upload = Upload::new(owner, &name, data).public(public).description(description).readme(readme);
            let version = hub.upload(upload).await.map_err(request)?;
            println!("{owner}/{name} v{version}");
        },
        Command::Fork { database, version } => {
            let forked = hub
                .fork(signed_in(viewer)?, &database.owner, &database.name, version)
                .await
                .map_err(request)?;
            println!("{} v{}", forked.key, forked.version);
        },
        Command::Table(args) => table(hub, viewer, args).await?,
        Command::Tables { database, version } => {
            let tables = hub
                .tables(viewer, &database.owner, &database.name, version)
                .await
                .map_err(request)?;
            for table in tables {
                println!("{table}");
            }
        },
        Command::Download {
            database,
            version,
            output,
        } => {
            let (record, data) = hub
                .download(viewer, &database.owner, &database.name, version)
                .await
                .map_err(request)?;
            tokio::fs::write(&output, &data)
                .await
                .or_raise(|| ErrorKind::File(output.display().to_string()))?;
            println!("{database} v{} -> {} ({} bytes)", record.version, output.display(), data.len());
        },
        Command::Settings(args) => settings(hub, viewer, args).await?,
        Command::Star { database } => {
            let stars = hub
                .toggle_star(signed_in(viewer)?, &database.owner, &database.name)
                .await
                .map_err(request)?;
            println!("{database}: {stars} star(s)");
        },
        Command::Versions { database } => {
            let versions = hub.versions(viewer, &database.owner, &database.name).await.map_err(request)?;
            print_json(&versions)?;
        },
        Command::Forks { database } => {
            let forks = hub.forks(viewer, &database.owner, &database.name).await.map_err(request)?;
            print_json(&forks)?;
        },
        Command::Orphans { owner } => {
            let owner = match owner.as_deref() {
                Some(owner) => owner,
                None => signed_in(viewer)?,
            };
            for object in hub.orphaned_objects(owner).await.map_err(request)? {
                println!("{}/{}\t{}\t{}", object.bucket, object.id, object.size, object.modified);
            }
        },
    }
    Ok(())
}

async fn table(hub: &Hub, viewer: Option<&str>, args: TableArgs) -> Result<()> {
    let TableArgs {
        database: DatabaseRef { owner, name },
        table,
        version,
        sort,
        direction,
        offset,
        rows,
    } = args;
    let page = TableRequest {
        version,
        table,
        sort_column: sort,
        sort_direction: direction,
        offset,
        row_cap: rows,
        ..TableRequest::new(viewer, owner, name)
    };
    let view = hub.read_table(&page).await.map_err(request)?;
    print_json(&view)
}

async fn settings(hub: &Hub, viewer: Option<&str>, args: SettingsArgs) -> Result<()> {
    let viewer = signed_in(viewer)?;
    let database = &args.database;
    let current = hub.identity(Some(viewer), &database.owner, &database.name).await.map_err(request)?;
    let settings = Settings {
        description: args.description.clone().unwrap_or(current.description),
        readme: read_text(args.readme.as_deref()).await?.unwrap_or(current.readme),
        default_table: args.default_table.clone().or(current.default_table),
        public: args.visibility().unwrap_or(current.public),
        new_name: args.rename.clone(),
    };
    let key = hub
        .save_settings(viewer, &database.owner, &database.name, settings)
        .await
        .map_err(request)?;
    println!("{key} saved");
    Ok(())
}
