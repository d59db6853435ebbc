mod sim;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tickspace_kernel::{AdmissionQueue, WorldDirectory};
use tickspace_scheduler::{
    Clock, Connections, ManualClock, SchedulerConfig, ServerContext, SystemClock, TickScheduler,
};
use tracing_subscriber::EnvFilter;

use crate::sim::{Population, RunSummary};

#[derive(Parser)]
#[command(name = "tickspace-cli", about = "CLI tool for tickspace operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate versions
    Info,
    /// Drive the scheduler over a simulated population
    Run {
        /// Number of ticks to run
        #[arg(short, long, default_value = "100")]
        ticks: u64,
        /// Number of worlds
        #[arg(short, long, default_value = "2")]
        worlds: usize,
        /// Wandering non-player entities, spread over the worlds
        #[arg(short, long, default_value = "500")]
        entities: usize,
        /// Simulated players; every fourth one never answers keep-alives
        #[arg(short, long, default_value = "8")]
        players: usize,
        /// YAML scheduler configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Run on the tick thread against the wall clock instead of simulated time
        #[arg(long)]
        realtime: bool,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a YAML scheduler configuration
    CheckConfig {
        /// Path to the configuration file
        path: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("tickspace-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("tracking: {}", tickspace_tracking::crate_info());
            println!("kernel: {}", tickspace_kernel::crate_info());
            println!("scheduler: {}", tickspace_scheduler::crate_info());
            println!(
                "defaults: view_distance={} chunk_size={}",
                tickspace_tracking::DEFAULT_VIEW_DISTANCE,
                tickspace_common::CHUNK_SIZE
            );
        }
        Commands::Run {
            ticks,
            worlds,
            entities,
            players,
            config,
            realtime,
            json,
        } => {
            let config = match config {
                Some(path) => SchedulerConfig::load(&path)?,
                None => SchedulerConfig::default(),
            };
            let summary = run(&config, ticks, worlds, entities, players, realtime)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "Ran {} ticks over {} worlds with the {} strategy",
                    summary.ticks, summary.worlds, summary.strategy
                );
                println!(
                    "Entities: {}, players admitted: {}, disconnected: {}",
                    summary.entities, summary.players_admitted, summary.players_disconnected
                );
                println!(
                    "Moves: {} applied, {} rejected; view events: {}; keep-alives: {}",
                    summary.moves_applied,
                    summary.moves_rejected,
                    summary.view_events,
                    summary.keep_alives
                );
                println!(
                    "Tick time: mean {}us, max {}us, max partitions {}",
                    summary.mean_tick_micros, summary.max_tick_micros, summary.max_partitions
                );
            }
        }
        Commands::CheckConfig { path } => {
            let config = SchedulerConfig::load(&path)?;
            println!("{}: OK", path.display());
            print!("{}", config.to_yaml()?);
        }
    }

    Ok(())
}

fn run(
    config: &SchedulerConfig,
    ticks: u64,
    world_count: usize,
    entities: usize,
    players: usize,
    realtime: bool,
) -> anyhow::Result<RunSummary> {
    let worlds = Arc::new(WorldDirectory::new());
    for _ in 0..world_count.max(1) {
        worlds.create(config.view_distance_chunks)?;
    }
    let connections = Arc::new(Connections::new());
    let admissions = Arc::new(AdmissionQueue::new());
    let manual = Arc::new(ManualClock::new(0));
    let clock: Arc<dyn Clock> = if realtime {
        Arc::new(SystemClock)
    } else {
        manual.clone()
    };

    let mut population = Population::seed(
        worlds.clone(),
        connections.clone(),
        &admissions,
        entities,
        players,
        clock.now_millis(),
    )?;
    let context = ServerContext::with_clock(
        worlds.clone(),
        connections.clone(),
        admissions.clone(),
        clock.clone(),
    );
    let scheduler = TickScheduler::new(config.clone(), context)?;

    let mut summary = RunSummary {
        strategy: config.partition_strategy.to_string(),
        worlds: worlds.len(),
        entities: population.entity_count(),
        ..RunSummary::default()
    };

    if realtime {
        // Moves and client replies race the tick thread, as they would in a server.
        scheduler.start()?;
        let period = config.tick_period();
        let mut seen = 0;
        while seen < ticks {
            population.wander(seen);
            std::thread::sleep(period);
            population.service_clients(clock.now_millis());
            population.flush_outboxes();
            seen = scheduler.tick_count();
        }
        scheduler.stop()?;
        scheduler.join();
        summary.ticks = scheduler.tick_count();
    } else {
        let period = config.tick_period_millis as i64;
        let started = Instant::now();
        for tick in 0..ticks {
            population.wander(tick);
            let report = scheduler.run_tick()?;
            summary.record(&report);
            population.service_clients(manual.now_millis());
            population.flush_outboxes();
            manual.advance(period);
        }
        tracing::info!(elapsed = ?started.elapsed(), "simulated run finished");
    }

    if realtime {
        // Admissions happened on the tick thread; count them from the worlds.
        summary.players_admitted = worlds
            .worlds()
            .iter()
            .map(|w| w.tracker().players().len())
            .sum::<usize>()
            + population.disconnected();
    }
    summary.players_disconnected = population.disconnected();
    population.shutdown();
    Ok(summary)
}
