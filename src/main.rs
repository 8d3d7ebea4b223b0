use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use dotenv::dotenv;

use crate::bootstrap::{setup_database, AppServices};
use crate::config::dispatch_config::DispatchConfig;
use crate::logger::init_logger;
use crate::services::dispatch_queue_service::DispatchExecutor;
use crate::services::provider_client::HttpProviderClient;

mod app;
mod bootstrap;
mod config;
mod errors;
mod handlers;
mod logger;
mod models;
mod services;

#[cfg(test)]
mod tests;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok(); // Cargar .env al inicio
    init_logger();

    let config = DispatchConfig::from_env()?;
    log::info!("Configuración: {:?}", config);

    let db_pool = setup_database(&config.database_url).await?;
    let services = AppServices::build(db_pool, Arc::new(HttpProviderClient::new()), &config);

    // Lo que quedó a medias en una caída pasa a failed (retry manual)
    services.queue.recover_interrupted().await?;

    let executor: Arc<dyn DispatchExecutor> = Arc::new(services.sender.clone());
    services.queue.spawn_workers(executor, config.queue_workers);
    services
        .status_sync
        .spawn_sweeper(config.status_sweep_interval());

    log::info!(
        "Levantando servidor en {}:{}",
        config.bind_addr,
        config.bind_port
    );
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(services.identities.clone()))
            .app_data(web::Data::new(services.reconciler.clone()))
            .app_data(web::Data::new(services.status_sync.clone()))
            .app_data(web::Data::new(services.restrictions.clone()))
            .app_data(web::Data::new(services.bindings.clone()))
            .app_data(web::Data::new(services.queue.clone()))
            .app_data(web::Data::new(services.sender.clone()))
            .configure(app::init_app)
    })
    .bind((config.bind_addr.as_str(), config.bind_port))?
    .run()
    .await?;

    Ok(())
}
