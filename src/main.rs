use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod database;
mod error;
mod models;
mod routes;
mod storage;

use config::Config;
use models::profile::{self, SessionMiddlewareFactory};
use storage::AttachmentStorage;

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "occurrence_tracker_server=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();

    profile::load_keys(&config.session_secret);
    database::connect(&config.mongodb_uri, &config.database_name)
        .await
        .context("Failed to connect to MongoDB")?;

    let storage = AttachmentStorage::new(&config.storage_dir, &config.public_base_url);
    storage
        .initialize()
        .context("Failed to initialize attachment storage")?;
    let storage = web::Data::new(storage);

    info!(
        "Starting occurrence tracker on {}:{}",
        config.bind_address, config.port
    );

    let cors_origin = config.cors_origin.clone();
    HttpServer::new(move || {
        let cors = match &cors_origin {
            Some(origin) => Cors::default()
                .allowed_origin(origin)
                .allow_any_method()
                .allow_any_header()
                .supports_credentials(),
            None => Cors::permissive(),
        };

        App::new()
            .app_data(storage.clone())
            .configure(routes::configure)
            .wrap(SessionMiddlewareFactory)
            .wrap(cors)
            .wrap(Logger::default())
    })
    .bind((config.bind_address.as_str(), config.port))
    .context("Failed to bind to address")?
    .run()
    .await
    .context("HTTP server failed")?;

    Ok(())
}
