use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use zenai::{
    config::Config,
    decision::HoldProvider,
    market::SimulatedMarket,
    models::NASDAQ_100_SYMBOLS,
    routes::router,
    state::build_state,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env ──────────────────────────────────────────────────────────
    dotenvy::dotenv().ok();

    // ── 2. Structured logging ─────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("zenai=debug".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!(r#"

  ╔═══════════════════════════════════════════════════════╗
  ║              ZENAI · Agent Trading Arena              ║
  ║      Scheduler · Ledger · Tools · Backtest · WS       ║
  ╚═══════════════════════════════════════════════════════╝"#);

    // ── 3. Config ─────────────────────────────────────────────────────────────
    let config = Config::from_env()?;
    info!(
        tick_interval_secs = config.tick_interval.as_secs(),
        initial_capital    = config.initial_capital,
        watchlist          = ?config.watchlist,
        "⚙️ Config loaded"
    );

    // ── 4. Collaborators + shared state ───────────────────────────────────────
    let market = Arc::new(SimulatedMarket::seeded(NASDAQ_100_SYMBOLS, config.history_days));
    let addr = config.bind_addr;
    let state = build_state(config, market, Arc::new(HoldProvider)).await;

    // ── 5. Router ─────────────────────────────────────────────────────────────
    let app = router(Arc::clone(&state));

    // ── 6. Bind & Serve ───────────────────────────────────────────────────────
    info!(?addr, "🚀 ZenAI server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    state.scheduler.shutdown().await;
    info!("👋 ZenAI server stopped");
    Ok(())
}
