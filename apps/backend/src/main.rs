use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use backend::config::ExperimentConfig;
use backend::llm::{DecisionAgent, OpenAiBackend, RateLimiter, DEFAULT_COMPLETION_MODEL};
use backend::middleware::cors::cors_middleware;
use backend::routes;
use backend::services::game_flow::{FlowPacing, GameFlowService};
use backend::services::matchmaking::Matchmaker;
use backend::services::storage::FileResultSink;
use backend::session::SessionRegistry;
use backend::state::AppState;
use backend::ws::hub::SessionHub;

mod telemetry;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    telemetry::init_tracing();

    // Environment variables must be set by the runtime environment
    // (docker env_file, or sourced manually for local dev).
    let host = std::env::var("BACKEND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("BACKEND_PORT")
        .unwrap_or_else(|_| "3001".to_string())
        .parse::<u16>()
        .unwrap_or_else(|_| {
            eprintln!("BACKEND_PORT must be a valid port number");
            std::process::exit(1);
        });

    let defaults = match ExperimentConfig::from_env() {
        Ok(defaults) => defaults,
        Err(err) => {
            eprintln!("invalid experiment configuration: {err}");
            std::process::exit(1);
        }
    };

    let completion_backend = match OpenAiBackend::try_from_env() {
        Ok(backend) => backend,
        Err(err) => {
            // Sessions still run: exhausted agent calls fall back to
            // WITHDRAW, so a missing credential degrades instead of failing.
            tracing::warn!(
                error = %err,
                "completion backend not configured; agent decisions will default to WITHDRAW"
            );
            OpenAiBackend::new("", DEFAULT_COMPLETION_MODEL)
        }
    };

    let results_dir =
        std::env::var("RESULTS_DIR").unwrap_or_else(|_| "./results".to_string());

    tracing::info!(
        host = %host,
        port,
        opponent = ?defaults.opponent,
        mode = ?defaults.mode,
        "starting bank-run experiment backend"
    );

    let agent = Arc::new(DecisionAgent::new(
        Arc::new(completion_backend),
        Arc::new(RateLimiter::default()),
    ));
    let flow = Arc::new(GameFlowService::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(Matchmaker::new()),
        Arc::new(SessionHub::new()),
        agent,
        Arc::new(FileResultSink::new(results_dir)),
        defaults,
        FlowPacing::default(),
    ));

    let data = web::Data::new(AppState::new(flow));

    HttpServer::new(move || {
        App::new()
            .wrap(cors_middleware())
            .app_data(data.clone())
            .configure(routes::configure)
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
