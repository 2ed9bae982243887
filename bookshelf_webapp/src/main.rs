use std::sync::Arc;

use actix_web::web::Data;
use actix_web::{App, HttpServer};
use anyhow::Context;
use opentelemetry::global;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::runtime::TokioCurrentThread;
use paperclip::actix::OpenApiExt;
use tracing_actix_web::TracingLogger;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use bookshelf_webapp::app_config::{config_api, config_pages};
use bookshelf_webapp::auth::{OAuthClient, SessionKey};
use bookshelf_webapp::captcha::{CaptchaVerifier, RecaptchaVerifier};
use bookshelf_webapp::pages::Site;
use bookshelf_webapp::settings::Settings;
use bookshelf_webapp::startup::{init_repository, seed_from_library};
use bookshelf_webapp::templates::Templates;

// Based on https://github.com/LukeMathWalker/tracing-actix-web/blob/main/examples/opentelemetry/src/main.rs#L15
fn init_telemetry() -> anyhow::Result<()> {
    let app_name = "bookshelf_webapp";

    // Spans are exported in batch to the Jaeger agent
    global::set_text_map_propagator(TraceContextPropagator::new());
    #[allow(deprecated)]
    let tracer = opentelemetry_jaeger::new_agent_pipeline()
        .with_service_name(app_name)
        .install_batch(TokioCurrentThread)
        .context("Failed to install OpenTelemetry tracer.")?;

    // Tunable via `RUST_LOG` env variable
    let env_filter = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new("info"));
    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);
    let formatting_layer = BunyanFormattingLayer::new(app_name.into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(env_filter)
        .with(telemetry)
        .with(JsonStorageLayer)
        .with(formatting_layer);
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install `tracing` subscriber.")
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry()?;
    let settings = Settings::from_env()?;

    let books_repository = init_repository(&settings.db).await?;
    if settings.seed_on_startup() {
        seed_from_library(books_repository.as_ref(), &settings.library).await?;
    }

    let captcha: Arc<dyn CaptchaVerifier> =
        Arc::new(RecaptchaVerifier::new(settings.captcha.clone())?);
    let site = Data::new(Site {
        templates: Templates::new()?,
        site_key: captcha.site_key().to_string(),
        admin_user_id: settings.admin.user_id.clone(),
        library: settings.library.clone(),
    });
    let books_repository = Data::new(books_repository);
    let captcha = Data::new(captcha);
    let session_key = Data::new(SessionKey::from_secret(&settings.session.secret));
    let oauth = Data::new(OAuthClient::new(settings.oauth.clone())?);

    tracing::info!(
        "starting HTTP server at http://{}:{}",
        settings.server.host,
        settings.server.port
    );
    HttpServer::new(move || {
        App::new()
            .wrap_api()
            .app_data(books_repository.clone())
            .app_data(site.clone())
            .app_data(captcha.clone())
            .app_data(session_key.clone())
            .app_data(oauth.clone())
            .wrap(TracingLogger::default())
            .configure(config_api)
            .with_json_spec_at("/apispec/v2")
            .build()
            .configure(config_pages)
    })
    .bind((settings.server.host.as_str(), settings.server.port))?
    .run()
    .await?;

    opentelemetry::global::shutdown_tracer_provider();
    Ok(())
}
