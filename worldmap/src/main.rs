use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use worldmap_metrics::PipelineMetrics;
use worldmap_pipeline::{Config, Coordinator, DeliveryClient, RecordBuilder, run_pass};
use worldmap_storage::{JsonFileStore, Ledger};
use worldmap_world::ChunkSource;
use worldmap_world::synthetic::{SyntheticWorld, Terrain};

const DEBUG_FILTER: &str =
    "info,worldmap=debug,worldmap_pipeline=debug,worldmap_storage=debug,worldmap_world=debug";

#[derive(Parser)]
#[command(name = "worldmap", about = "Streams world chunks to a map rendering service")]
pub struct Args {
    /// Directory holding config.json and the processed-chunk ledger
    #[arg(short, long, env = "WORLDMAP_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Overrides apiUrl from config.json
    #[arg(long, env = "WORLDMAP_API_URL")]
    pub api_url: Option<String>,

    /// Verbose logging and full error chains
    #[arg(long)]
    pub debug: bool,

    #[arg(short, long, default_value = "default")]
    pub world: String,

    /// Demo world generator: "flat" or "hills"
    #[arg(short, long, default_value = "flat")]
    pub generator: String,

    /// World seed (for hills)
    #[arg(short, long, default_value = "0")]
    pub seed: u64,

    /// Chunks from the origin to each edge of the demo world
    #[arg(short, long, default_value = "4")]
    pub radius: i32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let debug = args.debug || Config::peek(&args.data_dir).is_some_and(|config| config.debug_mode);
    let filter = if debug { DEBUG_FILTER } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let mut config = Config::load_or_init(&args.data_dir);
    if let Some(url) = args.api_url {
        config.api_url = url;
    }
    config.debug_mode = debug;
    log::info!("Worldmap starting ({})", config.summary());

    let ledger = Arc::new(Ledger::open(
        JsonFileStore::in_dir(&args.data_dir),
        config.flush_policy(),
    ));
    let metrics = Arc::new(PipelineMetrics::new(config.summary()));
    let delivery = DeliveryClient::from_config(&config, metrics.clone())
        .context("Failed to set up chunk delivery")?;

    let terrain = match args.generator.as_str() {
        "hills" => {
            log::info!("Using hills terrain with seed: {}", args.seed);
            Terrain::Hills { seed: args.seed }
        }
        "flat" => Terrain::Flat,
        other => {
            log::warn!("Unknown generator {:?}, using flat terrain", other);
            Terrain::Flat
        }
    };
    let world = Arc::new(SyntheticWorld::new(args.world, terrain, args.radius));

    let coordinator = Coordinator::new(
        world.world_id(),
        ledger,
        RecordBuilder::new(world.clone()),
        delivery,
        metrics.clone(),
    )
    .with_debug(debug);

    let run = async {
        let summary = run_pass(world.clone(), &coordinator).await;
        if summary.queued > 0 {
            log::info!("Waiting for {} chunks to be delivered. Press Ctrl+C to stop", summary.queued);
        }
        coordinator.wait_idle().await;
    };
    tokio::pin!(run);

    tokio::select! {
        _ = &mut run => {}
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => log::info!("Interrupted, shutting down"),
                Err(e) => {
                    log::error!("Failed to listen for Ctrl+C: {}", e);
                    run.await;
                }
            }
        }
    }

    coordinator.shutdown().await;
    println!("{}", metrics.generate_report());
    Ok(())
}
