use actix_web::{
    get, middleware, post,
    web::{Data, Json, JsonConfig},
    App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use clap::Parser;
use controller_core::telemetry;
use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::AdmissionReview;
use podpause::{
    admission,
    args::PauseArgs,
    policy::PauseConfig,
    store::{KubeStore, ObjectStore},
    ControllerSettings, State,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing::info;

/// Pause and resume pods by swapping their scheduler
#[derive(Parser, Debug)]
#[command(name = "podpause", version)]
struct Settings {
    /// Address of the metrics, health and admission endpoints
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:9556")]
    addr: String,

    /// Comma separated namespaces to act in, all when empty
    #[arg(long, env = "NAMESPACES", value_delimiter = ',')]
    namespaces: Vec<String>,

    /// Reconciliations running at once, per controller
    #[arg(long, env = "CONCURRENT", default_value_t = 2)]
    concurrent: usize,

    /// Do not serve the pod admission endpoint
    #[arg(long, env = "DISABLE_ADMISSION")]
    disable_admission: bool,

    #[command(flatten)]
    pause: PauseArgs,
}

/// Store and markers used by the admission endpoint
struct Admission {
    store: Arc<dyn ObjectStore>,
    config: PauseConfig,
}

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => HttpResponse::Ok().content_type(encoder.format_type()).body(buffer),
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

#[post("/mutate-v1-pod")]
async fn mutate(a: Data<Admission>, review: Json<AdmissionReview<Pod>>) -> impl Responder {
    let answered = admission::review(a.store.as_ref(), &a.config, review.into_inner()).await;
    HttpResponse::Ok().json(&answered)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init().await?;
    let settings = Settings::parse();
    let config = settings.pause.to_config();
    let namespaces: Vec<String> = settings
        .namespaces
        .iter()
        .map(|ns| ns.trim().to_string())
        .filter(|ns| !ns.is_empty())
        .collect();

    let client = kube::Client::try_default().await?;
    let state = State::new()?;
    let admission = Data::new(Admission {
        store: Arc::new(KubeStore::new(client.clone())),
        config: config.clone(),
    });

    // Start controllers
    let controller = podpause::run(state.clone(), client, ControllerSettings {
        config,
        namespaces,
        concurrency: settings.concurrent,
    });

    // Start web server
    let disable_admission = settings.disable_admission;
    let server = HttpServer::new(move || {
        let app = App::new()
            .app_data(Data::new(state.clone()))
            .app_data(admission.clone())
            .app_data(JsonConfig::default().limit(4 * 1024 * 1024))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics);
        if disable_admission {
            app
        } else {
            app.service(mutate)
        }
    })
    .bind(&settings.addr)?
    .shutdown_timeout(5);
    info!("Listening on {}", settings.addr);

    // Both runtimes implements graceful shutdown, so poll until both are done
    let (controller, server) = tokio::join!(controller, server.run());
    controller?;
    server?;
    Ok(())
}
