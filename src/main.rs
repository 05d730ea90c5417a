use std::net::SocketAddr;
use std::time::Duration;

use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};

use elaservice_controller::queue::Backoff;
pub use elaservice_controller::{self, telemetry, State};

#[derive(Debug, clap::Parser)]
struct Arguments {
    /// Number of ElaServices synced concurrently
    #[arg(long = "workers", env = "ELASERVICE_WORKERS", default_value_t = 2)]
    workers: usize,

    /// Domain suffix for ElaServices that don't set their own
    #[arg(
        long = "domain-suffix",
        env = "ELASERVICE_DOMAIN_SUFFIX",
        default_value = "demo-domain.com"
    )]
    domain_suffix: String,

    /// Delay before the first retry of a failed key
    #[arg(long = "backoff-base-ms", env = "ELASERVICE_BACKOFF_BASE_MS", default_value_t = 5)]
    backoff_base_ms: u64,

    /// Upper bound on the retry delay of a failed key
    #[arg(
        long = "backoff-max-secs",
        env = "ELASERVICE_BACKOFF_MAX_SECS",
        default_value_t = 1000
    )]
    backoff_max_secs: u64,

    #[arg(
        long = "bind-address",
        env = "ELASERVICE_BIND_ADDRESS",
        default_value = "0.0.0.0:8080"
    )]
    bind_address: SocketAddr,
}

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => HttpResponse::Ok().body(buffer),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init()?;

    let args: Arguments = Arguments::parse();
    anyhow::ensure!(args.workers > 0, "--workers must be at least 1");

    // Initiatilize Kubernetes controller state
    let state = State::new(
        args.workers,
        args.domain_suffix,
        Backoff::new(
            Duration::from_millis(args.backoff_base_ms),
            Duration::from_secs(args.backoff_max_secs),
        ),
        args.bind_address,
    );
    let controller = elaservice_controller::run(state.clone());

    // Start web server
    let bind_address = state.bind_address;
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind(bind_address)?
    .shutdown_timeout(5)
    .run();

    // The controller returns on SIGTERM; the server handles the same signal itself
    let (controller, server) = tokio::join!(controller, server);
    controller?;
    server?;
    Ok(())
}
