pub use controller::*;
use clap::Parser;
use controller::config::{LogFormat, Parameters};
use kube::client::Client;
use tokio::sync::watch;
use tracing::*;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

use actix_web::{
    get, middleware,
    web::Data,
    App, HttpRequest, HttpResponse, HttpServer, Responder,
};

#[get("/metrics")]
async fn metrics(c: Data<Manager>, _req: HttpRequest) -> impl Responder {
    match c.metrics() {
        Ok(metrics) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4; charset=utf-8")
            .body(metrics),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<Manager>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Parameters::parse().load()?;

    // Setup tracing layers
    let logger = match settings.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Console => tracing_subscriber::fmt::layer().boxed(),
    };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| Error::ConfigError(e.to_string()))?;
    let collector = Registry::default().with(logger).with(env_filter);
    tracing::subscriber::set_global_default(collector).map_err(|e| Error::ConfigError(e.to_string()))?;

    let repositories = common::storage::connect(&settings.storage).await?;
    let client = Client::try_default().await.map_err(Error::KubeError)?;

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Caught interrupt signal, shutting down...");
                stop.send_replace(true);
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for the interrupt signal");
                // Keep the sender alive, dropping it would stop everything
                std::future::pending::<()>().await;
            }
        }
    });

    // Start the observers once the configuration caches are ready
    let (manager, observers) =
        match Manager::new(client, repositories, settings.cleanup_period, shutdown).await {
            Ok(started) => started,
            Err(Error::Cancelled) => {
                info!("Goodbye");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

    // Start web server
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(manager.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind(&settings.listen)?
    .disable_signals()
    .shutdown_timeout(5)
    .run();
    let server_handle = server.handle();

    tokio::select! {
        _ = observers => info!("Observers stopped"),
        result = server => {
            warn!("actix exited");
            result?;
        },
    }
    server_handle.stop(true).await;
    info!("Goodbye");
    Ok(())
}
