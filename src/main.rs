use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use provenance_chain::anchor::engine::{AnchorOutcome, MerkleAnchorEngine};
use provenance_chain::anchor::ethereum::EthereumLedgerClient;
use provenance_chain::anchor::poller::AnchorConfirmationPoller;
use provenance_chain::anchor::ExternalLedgerClient;
use provenance_chain::chain::BlockPayload;
use provenance_chain::config::NodeConfig;
use provenance_chain::provenance::ProvenanceService;
use provenance_chain::store::memory::MemoryStore;
use provenance_chain::store::postgres::PostgresStore;
use provenance_chain::store::LedgerStore;
use provenance_chain::telemetry;

#[derive(Parser)]
#[command(name = "provenance-chain")]
#[command(about = "Tamper-evident provenance log for ML models, anchored to Ethereum")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    config: NodeConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,
    /// Ingest newline-delimited JSON payloads from stdin and poll anchor confirmations
    Serve,
    /// Append one JSON payload, e.g. '{"type":"model_registration","modelId":"m1"}'
    Append { payload: String },
    /// Run one anchoring evaluation now
    Anchor,
    /// Run one confirmation sweep over pending anchors
    Sweep,
    /// Verify the whole chain
    Verify,
    /// Show chain statistics
    Stats,
    /// Show the block at an index
    Block { index: u64 },
    /// Show the block with a hash
    BlockByHash { hash: String },
    /// Show the index of the chain tail
    Height,
    /// Show the history of a model
    Provenance { model_id: String },
    /// List anchors, oldest first
    Anchors,
    /// Show the Merkle inclusion proof of a block against its anchor
    MerkleProof { index: u64 },
}

struct Node {
    store: Arc<dyn LedgerStore>,
    ledger: Option<Arc<dyn ExternalLedgerClient>>,
    service: ProvenanceService,
}

async fn open_store(config: &NodeConfig) -> anyhow::Result<Arc<dyn LedgerStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("running migrations")?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, chain is held in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn build_node(config: &NodeConfig) -> anyhow::Result<Node> {
    let store = open_store(config).await?;
    let eth = config.ethereum()?;
    let explorer_url = eth.as_ref().and_then(|e| e.explorer_url.clone());

    let ledger: Option<Arc<dyn ExternalLedgerClient>> = match eth {
        Some(eth) => Some(Arc::new(EthereumLedgerClient::new(eth, config.ledger_timeout())?)),
        None => {
            tracing::info!("ethereum not configured, anchoring disabled");
            None
        }
    };

    let engine = match &ledger {
        Some(ledger) => Some(Arc::new(MerkleAnchorEngine::new(
            store.clone(),
            ledger.clone(),
            config.anchor_policy()?,
        ))),
        None => None,
    };

    let service = ProvenanceService::new(store.clone(), engine).with_explorer_url(explorer_url);
    service.init().await?;

    Ok(Node {
        store,
        ledger,
        service,
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_found<T: Serialize>(value: Option<T>, what: &str) -> anyhow::Result<()> {
    match value {
        Some(v) => print_json(&v),
        None => bail!("{what} not found"),
    }
}

fn report_outcome(outcome: Option<AnchorOutcome>) -> anyhow::Result<()> {
    match outcome {
        None => bail!("anchoring requires ETH_RPC_URL and ETH_PRIVATE_KEY"),
        Some(AnchorOutcome::NoBlocks) => println!("chain is empty, nothing to anchor"),
        Some(AnchorOutcome::BelowThreshold {
            unanchored,
            threshold,
        }) => println!("{unanchored} unanchored block(s), threshold is {threshold}"),
        Some(AnchorOutcome::Anchored(anchor)) => print_json(&anchor)?,
    }
    Ok(())
}

async fn serve(node: Node, config: &NodeConfig) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller = match &node.ledger {
        Some(ledger) => {
            let poller = Arc::new(AnchorConfirmationPoller::new(
                node.store.clone(),
                ledger.clone(),
                config.poller_config()?,
            ));
            Some(poller.spawn(shutdown_rx))
        }
        None => None,
    };

    tracing::info!("reading payloads from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<BlockPayload>(&line) {
                    Ok(payload) => match node.service.append_block(payload).await {
                        Ok(block) => println!("{}", serde_json::to_string(&block)?),
                        Err(e) => tracing::error!(error = %e, "append failed"),
                    },
                    Err(e) => tracing::warn!(error = %e, "skipping malformed payload"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    // Stdin closed: keep confirming anchors until interrupted.
    if let Some(handle) = poller {
        if !handle.is_finished() {
            tracing::info!("input closed, polling confirmations until ctrl-c");
            tokio::signal::ctrl_c().await?;
        }
        let _ = shutdown_tx.send(true);
        handle.await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(&cli.config.log_level, cli.config.log_json)?;

    if matches!(cli.command, Commands::Migrate) && cli.config.database_url.is_none() {
        bail!("migrate requires DATABASE_URL");
    }

    // Opening a Postgres store applies pending migrations.
    let node = build_node(&cli.config).await?;

    match cli.command {
        Commands::Migrate => println!("migrations applied"),
        Commands::Serve => serve(node, &cli.config).await?,
        Commands::Append { payload } => {
            let payload: BlockPayload =
                serde_json::from_str(&payload).context("parsing payload")?;
            let block = node.service.chain().append(payload).await?;
            print_json(&block)?;
            if node.ledger.is_some() {
                report_outcome(node.service.anchor_now().await?)?;
            }
        }
        Commands::Anchor => report_outcome(node.service.anchor_now().await?)?,
        Commands::Sweep => {
            let Some(ledger) = node.ledger else {
                bail!("sweeping requires ETH_RPC_URL and ETH_PRIVATE_KEY");
            };
            let poller =
                AnchorConfirmationPoller::new(node.store, ledger, cli.config.poller_config()?);
            print_json(&poller.sweep().await?)?;
        }
        Commands::Verify => {
            let result = node.service.verify_chain().await?;
            print_json(&result)?;
            if !result.valid {
                std::process::exit(1);
            }
        }
        Commands::Stats => print_json(&node.service.get_chain_stats().await?)?,
        Commands::Block { index } => {
            print_found(node.service.get_block(index).await?, "block")?
        }
        Commands::BlockByHash { hash } => {
            print_found(node.service.get_block_by_hash(&hash).await?, "block")?
        }
        Commands::Height => println!("{}", node.service.height().await?),
        Commands::Provenance { model_id } => {
            print_json(&node.service.get_provenance(&model_id).await?)?
        }
        Commands::Anchors => print_json(&node.service.list_anchors().await?)?,
        Commands::MerkleProof { index } => print_found(
            node.service.merkle_proof(index).await?,
            "anchor covering this block",
        )?,
    }

    Ok(())
}
