use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use path_generator::{
    api::{AppState, create_router},
    card_generator::CardGeneratorService,
    config::{Config, LoggingConfig},
    database::Database,
    llm_providers::build_model_client,
    log_system_event,
    pipeline::GenerationPipeline,
    planner::PlannerService,
    task_store::TaskStatusTable,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Logging comes up before the rest of the configuration so config
    // loading and validation are visible in the logs
    let _guard = setup_logging(&LoggingConfig::from_env()?)?;

    let config = Config::from_env()?;
    config.validate()?;

    log_system_event!(startup, component = "server", "Starting path generator server");

    let db = Database::new(&config.database.url).await?;
    info!("Database initialized successfully");

    let model = build_model_client(
        config.provider.kind,
        config.provider.api_key.clone(),
        config.provider.base_url.clone(),
        config.provider.model.clone(),
    );
    info!(
        "Initialized model client with provider: {:?}",
        config.provider.kind
    );

    let table = TaskStatusTable::new(
        config.generation.table_max_entries,
        config.generation.table_max_age_hours,
    );
    // Keeps sweeping for the life of the process
    let _reaper = table.spawn_reaper(Duration::from_secs(config.generation.reaper_interval_secs));

    let planner = PlannerService::new(Arc::clone(&model), db.clone());
    let card_generator = CardGeneratorService::new(
        model,
        db.clone(),
        config.generation.max_concurrent,
        config.generation.cards_per_section,
    );
    let pipeline = GenerationPipeline::new(
        db.clone(),
        planner,
        card_generator,
        table,
        Duration::from_secs(config.generation.pipeline_timeout_secs),
    );

    let state = AppState { pipeline, db };

    let app = create_router(state).layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn setup_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::fmt;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = config.console_enabled.then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(true)
    });

    let (file_layer, guard) = if config.file_enabled {
        std::fs::create_dir_all(&config.log_directory).unwrap_or_else(|e| {
            eprintln!(
                "Warning: Could not create log directory '{}': {}",
                config.log_directory, e
            );
        });

        let file_appender =
            tracing_appender::rolling::daily(&config.log_directory, "path-generator.log");
        let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

        // No ANSI colors in files
        let layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_writer(non_blocking_file);

        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if config.file_enabled {
        info!(
            "Logging initialized - writing to {}/path-generator.log with daily rotation",
            config.log_directory
        );
    }

    Ok(guard)
}
