use std::{net::SocketAddr, process, sync::Arc};

use angolo::{
    config::Config,
    infra::{error::AppError, http, telemetry, warmup},
    routes::build::build_routes,
};
use clap::Parser;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let config = Config::parse();

    telemetry::init(config.verbose)?;

    let routes = Arc::new(build_routes(&config)?);

    // Warm caches alongside the listener; early requests materialize
    // their own entries through the same single-flight path.
    tokio::spawn(warmup::print_routes(routes.clone()));

    let router = http::build_router(routes);
    let listener = tokio::net::TcpListener::bind((config.address.as_str(), config.port))
        .await
        .map_err(|source| AppError::bind(&config.address, config.port, source))?;

    info!(
        target: "angolo",
        address = %config.address,
        port = config.port,
        directory = %config.directory.display(),
        "serving"
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(AppError::Serve)
}
