use std::time::Duration;

use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};

pub use pulp_operator::{self, telemetry, State};

#[derive(Debug, clap::Parser)]
struct Arguments {
    /// Only reconcile Pulp resources in this namespace
    #[arg(long = "watch-namespace", env = "WATCH_NAMESPACE", value_name = "NAMESPACE")]
    watch_namespace: Option<String>,

    #[arg(
        long = "metrics-bind-address",
        env = "METRICS_BIND_ADDRESS",
        default_value = "0.0.0.0:8080"
    )]
    metrics_bind_address: String,

    /// Deadline for a single reconciliation pass, in seconds
    #[arg(
        long = "reconcile-timeout",
        env = "RECONCILE_TIMEOUT",
        value_name = "SECONDS",
        default_value_t = 120
    )]
    reconcile_timeout: u64,
}

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => HttpResponse::Ok()
            .content_type(encoder.format_type())
            .body(buffer),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
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
    telemetry::init().map_err(|e| anyhow::anyhow!(e))?;

    let args: Arguments = Arguments::parse();
    // an empty WATCH_NAMESPACE means every namespace
    let watch_namespace = args.watch_namespace.filter(|ns| !ns.is_empty());

    // Initiatilize Kubernetes controller state
    let state = State::new(
        watch_namespace,
        Duration::from_secs(args.reconcile_timeout),
    );
    let controller = pulp_operator::run(state.clone());
    tokio::pin!(controller);

    // Start web server
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind(&args.metrics_bind_address)?
    .shutdown_timeout(5)
    .run();

    tokio::pin!(server);

    // Both runtimes implements graceful shutdown, so poll until both are done
    tokio::join!(controller, server).1?;
    Ok(())
}
