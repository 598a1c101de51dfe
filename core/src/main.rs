use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{stdout, BufReader};
use tracing::info;

use sweepcore::{
    cli::{Cli, Command},
    config::Config,
    ndjson::{self, Record},
    services::log,
    MemoryStore, RetentionSweeper,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli.overrides)?;
    log::init(&cfg.log_filter)?;
    let store = Arc::new(
        MemoryStore::open(cfg.data_file.clone())
            .await
            .with_context(|| format!("opening store {}", cfg.data_file.display()))?,
    );
    let sweeper = RetentionSweeper::new(store.clone(), cfg.sweeper.clone());
    let mut out = stdout();

    match cli.command {
        Command::Run => {
            sweeper.start()?;
            info!("sweeper running - press Ctrl+C to exit");
            tokio::signal::ctrl_c().await?;
            sweeper.shutdown().await;
        }
        Command::Sweep => {
            let report = sweeper.run_full_sweep().await;
            ndjson::write_line(&mut out, &report).await?;
        }
        Command::Stats => {
            let stats = sweeper.statistics().await?;
            ndjson::write_line(&mut out, &stats).await?;
        }
        Command::Club { club_id } => {
            let report = sweeper.run_club_scoped_cleanup(&club_id).await;
            ndjson::write_line(&mut out, &report).await?;
        }
        Command::Task { task } => {
            let cleaned = sweeper
                .run_task(task)
                .await
                .with_context(|| format!("task {task} failed"))?;
            ndjson::write_line(&mut out, &serde_json::json!({ "task": task, "cleaned": cleaned }))
                .await?;
        }
        Command::Import { file } => {
            let input = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("opening {}", file.display()))?;
            let mut reader = BufReader::new(input);
            let mut records = Vec::new();
            while let Some(Record {
                collection,
                id,
                fields,
            }) = ndjson::read_record(&mut reader).await?
            {
                records.push((collection, id, fields));
            }
            let imported = store.insert_many(records).await?;
            info!(imported, file = %file.display(), "import finished");
        }
        Command::Export => {
            for (collection, doc) in store.export().await {
                let record = Record {
                    collection,
                    id: Some(doc.id),
                    fields: doc.fields,
                };
                ndjson::write_line(&mut out, &record).await?;
            }
        }
    }
    Ok(())
}
