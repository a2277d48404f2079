use clap::Parser;
use guardwatch::capture;
use guardwatch::config::{self, Config};
use guardwatch::constants::directory::PUBLISHED_FORMAT;
use guardwatch::directory::fetcher::HttpFetcher;
use guardwatch::directory::refresher::spawn_refresher;
use guardwatch::directory::RelayDirectory;
use guardwatch::events::{spawn_event_log_sink, spawn_reputation_log_sink, EventHub};
use guardwatch::logging;
use guardwatch::pipeline::Pipeline;
use guardwatch::reputation::ReputationEngine;
use guardwatch::shutdown::ShutdownManager;
use guardwatch::tagger::PacketTagger;
use guardwatch::topology::TopologySource;
use guardwatch::AppError;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "guardwatch")]
#[command(about = "Passive monitor for traffic to non-guard relays", long_about = None)]
struct Args {
    /// Config file (default: ~/.guardwatch/guardwatch.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override capture.interface
    #[arg(short, long)]
    interface: Option<String>,

    /// Replay this pcap file (overrides capture.pcap_file)
    #[arg(long)]
    pcap: Option<String>,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    generate_config: bool,

    /// Load or refresh the guard directory, report on it and exit
    #[arg(long)]
    check_directory: bool,

    /// Log every tagged packet
    #[arg(long)]
    print_packets: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config::get_data_dir().join("guardwatch.toml"));

    if args.generate_config {
        match Config::default().save_to_file(&config_path) {
            Ok(_) => {
                println!("✅ Generated default config at: {}", config_path.display());
                return;
            }
            Err(e) => {
                eprintln!("❌ Failed to generate config: {}", e);
                std::process::exit(1);
            }
        }
    }

    let mut config = match Config::load_or_create(&config_path) {
        Ok(cfg) => {
            println!("✓ Loaded configuration from {}", config_path.display());
            cfg
        }
        Err(e) => {
            eprintln!("❌ Failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(interface) = &args.interface {
        config.capture.interface = interface.clone();
    }
    if let Some(pcap) = &args.pcap {
        config.capture.pcap_file = Some(pcap.clone());
    }

    if let Err(e) = logging::init(&config.logging, args.verbose) {
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }

    let version = env!("CARGO_PKG_VERSION");
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    let build_date = option_env!("BUILD_DATE").unwrap_or("unknown");
    println!("\n🛡️  guardwatch v{} ({})", version, git_hash);
    println!("  └─ Build: {}", build_date);
    println!("═══════════════════════════════════════════════════════");
    println!();

    if let Err(e) = run(config, &args).await {
        tracing::error!("❌ {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config, args: &Args) -> Result<(), AppError> {
    let mut shutdown_manager = ShutdownManager::new();
    let token = shutdown_manager.token();

    let membership = config.topology().membership(&config.capture.interface)?;
    // A bad capture source fails before any network traffic
    let source = if args.check_directory {
        None
    } else {
        Some(capture::open_configured(&config.capture)?)
    };

    let fetcher = Arc::new(HttpFetcher::new(
        &config.directory.url,
        config.fetch_timeout(),
    )?);
    let directory = Arc::new(RelayDirectory::new(
        config.cache_path(),
        config.freshness(),
        fetcher,
    ));
    let snapshot = directory.refresh(&token).await?;

    // --check-directory: report and exit without capturing
    let Some(source) = source else {
        println!("📒 Guard directory: {}", directory.cache_path().display());
        println!(
            "  └─ Published: {}",
            snapshot.published().format(PUBLISHED_FORMAT)
        );
        println!("  └─ Relays: {}", snapshot.relays().len());
        println!(
            "  └─ Fresh: {}",
            if directory.is_fresh(&snapshot) { "yes" } else { "no" }
        );
        return Ok(());
    };

    let hub = EventHub::new(config.events.channel_capacity);
    shutdown_manager.register_task(spawn_event_log_sink(
        hub.subscribe_events(),
        token.clone(),
    ));
    shutdown_manager.register_task(spawn_reputation_log_sink(
        hub.subscribe_reputation(),
        token.clone(),
    ));

    let engine = ReputationEngine::new(snapshot.clone(), config.reputation_policy());
    let pipeline = Pipeline::start(
        source,
        PacketTagger::new(membership),
        engine,
        config.pipeline_config(args.print_packets),
        &hub,
        token.clone(),
    );
    // The analysis worker holds the only publisher from here on; sinks see
    // the hub close when it exits.
    drop(hub);

    match config.refresh_interval() {
        Some(period) => shutdown_manager.register_task(spawn_refresher(
            directory.clone(),
            period,
            snapshot.published(),
            pipeline.directory_updates(),
            token.clone(),
        )),
        None => tracing::info!("Guard directory refresh is startup-only"),
    }

    let reason = shutdown_manager.wait_for_shutdown().await;
    tracing::debug!("Shutdown reason: {:?}", reason);

    let report = pipeline.join().await?;
    tracing::info!("📊 Capture: {}", report.capture);
    tracing::info!(
        "📊 Analysis: {} packets, {} addresses tracked, {} trusted",
        report.engine.packets_analysed,
        report.engine.tracked_addresses,
        report.engine.trusted_addresses
    );
    Ok(())
}
