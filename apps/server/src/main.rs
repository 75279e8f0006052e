#![warn(clippy::all, clippy::pedantic)]

use std::net::SocketAddr;

use actix_web::{App, HttpServer, web::Data};
use apimon_service::{Config, Runtime};
use tracing::info;

mod error;
mod routes;

use error::AppError;
use logger::init_tracing;
use routes::AppState;

/// Config path baked in from `.env` at build time, overridable at runtime
fn config_path() -> Option<String> {
    std::env::var("APIMON_CONFIG").ok().or_else(|| option_env!("APIMON_CONFIG").map(str::to_string))
}

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    init_tracing();

    let config = Config::from_config(config_path())?;
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    let mut runtime = Runtime::build(config).await?;
    runtime.start()?;

    let result = run_server(addr, &runtime).await;
    runtime.shutdown();
    result
}

async fn run_server(addr: SocketAddr, runtime: &Runtime) -> Result<(), AppError> {
    let state = Data::new(AppState::from_runtime(runtime));
    info!(%addr, "Starting HTTP server");

    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes::routes))
        .bind(addr)?
        .run()
        .await?;

    Ok(())
}
