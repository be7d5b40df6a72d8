use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use claims_projection_service::config::Config;
use claims_projection_service::handlers::{self, AppState};
use claims_projection_service::ProjectionSession;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,claims_projection_service=debug".into());

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting claims-projection-service");

    let config = Config::from_env().context("Failed to load configuration")?;

    let mut session = ProjectionSession::from_config(&config.kafka);

    session
        .start()
        .await
        .context("Failed to start CDC projection session")?;

    let state = AppState {
        query: session.query(),
        health: session.health(),
        registry: prometheus::default_registry().clone(),
        port: config.http.port,
    };

    info!(
        "Starting HTTP server on {}:{}",
        config.http.host, config.http.port
    );

    let served = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(handlers::configure)
    })
    .bind((config.http.host.as_str(), config.http.port))
    .context("Failed to bind HTTP server")?
    .run()
    .await
    .context("HTTP server error");

    session.stop().await;
    info!("claims-projection-service stopped");

    served
}
