use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coda_agent::ollama::OllamaClient;
use coda_agent::services::CoreServices;
use coda_agent::speech::{ExternalStt, MockTts, TtsEngine};
use coda_agent::telemetry::Telemetry;
use coda_agent::tools::ToolRouter;
use coda_agent::Orchestrator;
use coda_core::config::CodaConfig;
use coda_core::paths::DataLayout;
use coda_events::EventBus;
use coda_memory::long_term::LongTermConfig;
use coda_memory::service::{MemoryService, MemoryServiceConfig};
use coda_memory::topics::TopicConfig;
use coda_perf::monitor::emit_system_info;
use coda_perf::ResourceMonitor;

use coda_gateway::app;
use coda_gateway::ws::fanout::FanoutServer;

#[derive(Parser, Debug)]
#[command(name = "coda-gateway", about = "Coda voice-assistant core gateway")]
struct Args {
    /// Path to coda.toml (defaults to ./coda.toml, then built-ins).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    // 0 on clean shutdown, 1 on fatal initialization error.
    if let Err(e) = run().await {
        eprintln!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = CodaConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("config load failed ({e}), using defaults");
        CodaConfig::default()
    });

    let layout = DataLayout::new(&config.data.dir);
    layout.ensure()?;

    // Log to stdout and to data/logs/coda_<timestamp>.log.
    let log_path = layout
        .logs_dir()
        .join(DataLayout::log_file_name(chrono::Utc::now()));
    let log_file = std::fs::File::create(&log_path)?;
    let (file_writer, _log_guard) = tracing_appender::non_blocking(log_file);
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(fmt::layer())
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();
    info!(version = env!("CARGO_PKG_VERSION"), log = %log_path.display(), "starting Coda");

    // Event fabric first: the dispatcher begins draining immediately, so
    // startup events land in the replay ring before any observer joins.
    let (sink, stream) = EventBus::channel();
    let server = FanoutServer::new(stream);

    let perf = coda_perf::install_global(sink.clone());
    let monitor = ResourceMonitor::spawn(
        Arc::clone(&perf),
        sink.clone(),
        Duration::from_secs(config.performance.monitoring_interval_secs.max(1)),
    );
    emit_system_info(&sink);

    let telemetry = Telemetry::new(sink.clone(), Arc::clone(&perf));

    // Adapters.
    let llm = Arc::new(OllamaClient::new(
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    ));
    if config.tts.engine != "mock" {
        warn!(engine = %config.tts.engine, "TTS engine not built in, using mock");
    }
    let tts: Arc<dyn TtsEngine> = Arc::new(MockTts::new(config.tts.voice.clone(), true));
    let stt = Arc::new(ExternalStt::new(config.stt.mode.clone()));

    // Memory subsystem.
    let long_term = config.memory.long_term_enabled.then(|| LongTermConfig {
        path: (!config.memory.long_term_path.is_empty())
            .then(|| std::path::PathBuf::from(&config.memory.long_term_path)),
        backup_path: Some(layout.memory_backup_dir()),
        max_memories: config.memory.max_memories,
        decay_days: 30.0,
    });
    let memory = Arc::new(MemoryService::open(MemoryServiceConfig {
        max_turns: config.memory.max_turns,
        long_term,
        min_similarity: config.memory.min_similarity,
        topics: TopicConfig {
            similarity_threshold: config.memory.topic_similarity_threshold,
            max_topics_per_cluster: config.memory.max_topics_per_cluster,
            cache_ttl: Duration::from_secs(config.memory.summary_cache_ttl_secs),
            ..TopicConfig::default()
        },
    })?);

    let services = Arc::new(CoreServices {
        config: config.clone(),
        layout,
        telemetry,
        perf,
        memory,
        tools: Arc::new(ToolRouter::new()),
        llm,
        tts,
        stt,
    });

    // Tool registration, prompt seeding, TTS worker, IDLE.
    let orchestrator = Orchestrator::start(services)?;

    let state = Arc::new(app::AppState {
        config: config.clone(),
        orchestrator: Arc::clone(&orchestrator),
        fanout: Arc::clone(&server.state),
    });
    server
        .start(
            &config.websocket.host,
            config.websocket.port,
            app::build_router(state),
        )
        .await?;
    info!(
        "ready — observers at ws://{}:{}/ws",
        config.websocket.host, config.websocket.port
    );

    shutdown_signal().await;
    info!("shutdown signal received");

    orchestrator.shutdown().await;
    monitor.stop().await;
    server.stop().await;

    info!("Coda shutdown complete, goodbye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
