//! Triangular arbitrage engine entry point.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use triangular_arb::api::{create_router, AppState, BotStatus};
use triangular_arb::arbitrage::{ExecutionCoordinator, OpportunityScanner, RouteSimulator};
use triangular_arb::config::Config;
use triangular_arb::engine::{ArbitrageEngine, CycleReport};
use triangular_arb::market::{BinanceClient, FeeSource};
use triangular_arb::metrics;
use triangular_arb::risk::{LiquidityAnalyzer, RiskCalculator};
use triangular_arb::trading::PaperExchange;
use triangular_arb::utils::{shutdown_signal, spawn_shutdown_flag};

type Engine = ArbitrageEngine<BinanceClient, Arc<PaperExchange>>;

/// Triangular arbitrage scanner and executor.
#[derive(Parser, Debug)]
#[command(name = "triangular-arb")]
#[command(about = "Multi-hop arbitrage scanner and executor for spot order books")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true, env = "VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,

    /// Paper trade against live books (no real orders).
    #[arg(long)]
    dry_run: Option<bool>,

    /// HTTP server port for health/metrics; overrides PORT.
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scan loop (default).
    Run {
        /// Paper trade against live books (no real orders).
        #[arg(long)]
        dry_run: Option<bool>,

        /// HTTP server port for health/metrics; overrides PORT.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Run a single scan cycle, print ranked opportunities and exit.
    ScanOnce {
        /// Opportunities to print.
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env may set VERBOSE and RUST_LOG
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("triangular_arb=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Handle subcommands
    match args.command {
        Some(Command::CheckConfig) => cmd_check_config().await,
        Some(Command::ScanOnce { limit }) => cmd_scan_once(limit).await,
        Some(Command::Run { dry_run, port }) => cmd_run(dry_run, port).await,
        None => cmd_run(args.dry_run, args.port).await,
    }
}

/// Load and validate configuration, logging failures.
fn load_config(dry_run_override: Option<bool>) -> anyhow::Result<Config> {
    info!("Loading configuration...");
    let mut config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    // Override with CLI args if provided
    if let Some(dry_run) = dry_run_override {
        config.dry_run = dry_run;
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }

    info!("Configuration loaded successfully");
    Ok(config)
}

/// Build a detection-only engine from `config`.
fn build_engine(config: &Config) -> anyhow::Result<(Engine, Arc<dyn FeeSource>)> {
    let fees: Arc<dyn FeeSource> = Arc::new(config.fee_table());
    let client = BinanceClient::new(
        config.exchange_rest_url.clone(),
        Duration::from_millis(config.http_timeout_ms),
    )?;

    let analyzer = || {
        LiquidityAnalyzer::new(config.liquidity_settings(), fees.clone(), config.slippage_pct)
    };
    let scanner = OpportunityScanner::new(
        config.scanner_settings(),
        RouteSimulator::new(fees.clone(), config.slippage_pct),
        analyzer(),
    );
    let risk = RiskCalculator::new(config.risk_settings(), analyzer());

    let engine = ArbitrageEngine::new(client, scanner, risk, config.engine_settings());
    Ok((engine, fees))
}

/// Check configuration validity.
async fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("TRIANGULAR ARB - CONFIGURATION CHECK");
    println!("======================================================================");

    // Load configuration
    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    // Validate configuration
    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    let fees = config.fee_table();
    let trial_amounts: Vec<String> = config.trial_amounts().iter().map(|a| a.to_string()).collect();

    // Show configuration summary
    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Profile: {}", config.profile);
    println!("  Dry Run: {}", config.dry_run);
    println!("  Base Asset: {}", config.base_asset);
    println!("  Profit Threshold: {}", config.profit_threshold());
    println!("  Trial Amounts: {}", trial_amounts.join(", "));
    println!("  Max Hops: {}", config.max_hops);
    println!("  Candidate Assets: {}", config.candidate_asset_limit);
    println!("  Reverse Routes: {}", if config.scan_reverse_routes { "Enabled" } else { "Disabled" });
    println!("  Taker Fee: {} (maker {})", fees.taker, fees.maker);
    println!("  Max Position: {} ({} of capital)", config.max_position_size(), config.max_position_risk);
    println!("  Daily Risk: {} / {} trades", config.max_daily_risk, config.max_daily_trades);
    println!("  Margin: {}", if config.margin_enabled { "Enabled" } else { "Disabled" });
    println!("  Cycle Pause: {:?}", config.sleep_between());
    println!("  Exchange: {}", config.exchange_rest_url);
    println!("  Log Level: {}{}", config.rust_log, if config.verbose { " (verbose)" } else { "" });
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Run one scan cycle and print the ranked opportunities.
async fn cmd_scan_once(limit: usize) -> anyhow::Result<()> {
    let config = load_config(None)?;
    let (engine, _) = build_engine(&config)?;

    if let Err(e) = engine.load_symbols().await {
        error!("Symbol metadata unavailable, cannot detect opportunities: {}", e);
        return Err(e.into());
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let report = engine.run_cycle(&cancel).await?;

    println!("======================================================================");
    println!("TRIANGULAR ARB - SCAN RESULTS");
    println!("======================================================================");
    println!(
        "Books: {}  Evaluated: {}  Found: {}  Accepted: {}  ({:.0}ms)",
        report.books,
        report.routes_evaluated,
        report.evaluated.len(),
        report.accepted(),
        report.elapsed.as_secs_f64() * 1000.0
    );
    println!("----------------------------------------------------------------------");

    if report.evaluated.is_empty() {
        println!("No opportunities above {}.", config.profit_threshold());
    }
    for (rank, e) in report.evaluated.iter().take(limit).enumerate() {
        let o = &e.opportunity;
        println!(
            "{:>2}. {}  amount {}  profit {}%  confidence {}  {}",
            rank + 1,
            o.route,
            o.amount,
            o.profit_pct.round_dp(4),
            o.confidence.round_dp(2),
            if e.accepted() { "ACCEPT" } else { "REJECT" }
        );
    }
    println!("======================================================================");

    Ok(())
}

/// Run the main scan loop.
async fn cmd_run(dry_run_override: Option<bool>, port_override: Option<u16>) -> anyhow::Result<()> {
    let config = load_config(dry_run_override)?;
    let port = port_override.unwrap_or(config.port);

    // Metrics recorder
    let prometheus = match metrics::install_prometheus() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Prometheus recorder not installed: {}", e);
            None
        }
    };

    // Create app state
    let mut app_state = AppState::new();
    if let Some(handle) = prometheus {
        app_state = app_state.with_prometheus(handle);
    }

    // Start HTTP server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let router = create_router(app_state.clone());
    let _server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    // Wire the engine
    let (engine, fees) = build_engine(&config)?;
    let paper = Arc::new(PaperExchange::new(
        fees.clone(),
        config.slippage_pct,
        [(config.base_asset.clone(), config.sim_balance)],
    ));

    let engine = if config.dry_run {
        engine.with_executor(ExecutionCoordinator::new(
            paper.clone(),
            fees,
            config.execution_settings(),
        ))
    } else {
        error!("No authenticated trading backend configured, cannot execute trades");
        warn!("Continuing in detection-only mode");
        engine
    };
    let mode = if engine.can_execute() { "paper" } else { "detection-only" };

    if let Err(e) = engine.load_symbols().await {
        error!("Symbol metadata unavailable, cannot detect opportunities: {}", e);
        return Err(e.into());
    }

    info!("========================================");
    info!("TRIANGULAR ARBITRAGE ENGINE STARTED");
    info!("========================================");
    info!("Mode:             {}", mode);
    info!("Profile:          {}", config.profile);
    info!("Base asset:       {}", config.base_asset);
    info!("Profit threshold: {}", config.profit_threshold());
    info!("Max hops:         {}", config.max_hops);
    info!("Trial amounts:    {:?}", config.trial_amounts());
    info!("========================================");

    app_state.set_ready(true);

    let cancel = Arc::new(AtomicBool::new(false));
    let _shutdown_handle = spawn_shutdown_flag(cancel.clone());
    let pause = config.sleep_between();
    let mut cycle = 0u64;

    while !cancel.load(Ordering::SeqCst) {
        cycle += 1;

        match engine.run_cycle(&cancel).await {
            Ok(report) => log_cycle(cycle, &report),
            Err(e) => error!(cycle, "Cycle failed: {}", e),
        }

        publish(&app_state, &engine, mode).await;

        if cancel.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = shutdown_signal() => cancel.store(true, Ordering::SeqCst),
        }
    }

    app_state.set_ready(false);

    info!("========================================");
    info!("SHUTDOWN - FINAL SUMMARY");
    info!("========================================");
    let stats = engine.stats();
    info!("Cycles:                 {} ({} failed)", stats.cycles, stats.failed_cycles);
    info!("Opportunities detected: {}", stats.opportunities_detected);
    info!("Accepted / rejected:    {} / {}", stats.opportunities_accepted, stats.opportunities_rejected);
    if let Some(exec) = engine.executor_stats() {
        info!("----------------------------------------");
        info!("Executions:             {}", exec.total_executions);
        info!("Success rate:           {:.1}%", exec.success_rate * 100.0);
        info!("Total profit:           {}", exec.total_profit.round_dp(8));
        info!("Rollbacks:              {}", exec.rollbacks);
        info!("Paper balance:          {} {}", paper.balance(&config.base_asset), config.base_asset);
    }
    info!("========================================");

    Ok(())
}

fn log_cycle(cycle: u64, report: &CycleReport) {
    match report.evaluated.first() {
        Some(best) => info!(
            cycle,
            books = report.books,
            found = report.evaluated.len(),
            accepted = report.accepted(),
            best = %best.opportunity.route,
            profit_pct = %best.opportunity.profit_pct.round_dp(4),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Cycle complete"
        ),
        None => info!(
            cycle,
            books = report.books,
            evaluated = report.routes_evaluated,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Cycle complete, no opportunities"
        ),
    }
}

async fn publish(state: &AppState, engine: &Engine, mode: &str) {
    state
        .publish_status(BotStatus {
            mode: mode.to_string(),
            base_asset: engine.settings().base_asset.clone(),
            engine: engine.stats(),
            scanner: engine.scanner_stats(),
            executor: engine.executor_stats(),
            risk: Some(engine.risk_summary()),
        })
        .await;
    state
        .publish_opportunities(&engine.latest_opportunities())
        .await;
}
