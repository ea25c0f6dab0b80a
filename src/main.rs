use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use order_notify::config::{self, Config};
use order_notify::db::{self, OrderChanges, Pool, SqliteTokenStore};
use order_notify::dispatch::DispatchCoordinator;
use order_notify::model::MutationEvent;
use order_notify::push::{DeliveryGateway, HttpPushProvider};
use order_notify::recipient::RecipientResolver;
use order_notify::worker::DispatchQueue;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Dispatch mutation events read as JSON lines from stdin
    Serve,
    /// Register (or rotate) the device token of an owner
    RegisterToken {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        token: String,
    },
    /// Create an order in the pending state
    CreateOrder {
        #[arg(long)]
        id: String,
        #[arg(long)]
        customer: String,
        #[arg(long, default_value_t = 0)]
        total: i64,
    },
    /// Change an order's status through the store, notifying the customer
    SetStatus {
        #[arg(long)]
        order: String,
        #[arg(long)]
        status: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::Serve => serve(&cfg, pool).await,
        Command::RegisterToken { owner, token } => {
            db::upsert_device_token(&pool, &owner, &token).await?;
            info!(owner_id = %owner, "device token registered");
            Ok(())
        }
        Command::CreateOrder {
            id,
            customer,
            total,
        } => {
            let row = db::insert_order(&pool, &id, &customer, total).await?;
            info!(order_id = %row.id, status = %row.status, "order created");
            Ok(())
        }
        Command::SetStatus { order, status } => {
            let queue = start_queue(&cfg, pool.clone())?;
            let row = db::update_order(&pool, &order, &OrderChanges::status(status), &queue).await;
            queue.shutdown().await;
            let row = row?;
            info!(order_id = %row.id, status = %row.status, "order updated");
            Ok(())
        }
    }
}

/// Build the dispatch pipeline. The provider client is created once here and
/// shared read-only by every worker.
fn start_queue(cfg: &Config, pool: Pool) -> Result<DispatchQueue> {
    let gateway = if cfg.push.enabled {
        let provider = HttpPushProvider::new(
            &cfg.push.endpoint,
            cfg.push.api_key.clone(),
            cfg.push.timeout(),
        )?;
        DeliveryGateway::new(Arc::new(provider), cfg.push.timeout())
    } else {
        warn!("push disabled; deliveries will report the provider as unavailable");
        DeliveryGateway::unavailable()
    };
    let resolver = RecipientResolver::new(Arc::new(SqliteTokenStore::new(pool)));
    let coordinator = DispatchCoordinator::with_fields(
        resolver,
        gateway,
        cfg.dispatch.status_field.clone(),
        cfg.dispatch.owner_field.clone(),
    );
    Ok(DispatchQueue::start(
        Arc::new(coordinator),
        cfg.app.workers,
        cfg.app.queue_capacity,
    ))
}

async fn serve(cfg: &Config, pool: Pool) -> Result<()> {
    let queue = start_queue(cfg, pool)?;
    info!("reading mutation events from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0u64;
    let read_result = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(err) => break Err(anyhow!(err).context("failed to read stdin")),
        };
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<MutationEvent>(&line) {
            Ok(event) => {
                queue.submit(&event);
            }
            Err(err) => warn!(line = line_no, %err, "ignoring malformed mutation event"),
        }
    };

    let stats = queue.shutdown().await;
    info!(?stats, "input closed; dispatch drained");
    read_result
}
