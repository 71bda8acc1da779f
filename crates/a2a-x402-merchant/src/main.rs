use actix_cors::Cors;
use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{web, App, HttpServer};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use x402_a2a::{ConfiguredFacilitator, FacilitatorConfig, NegotiatorConfig, PaymentNegotiator};
use x402_merchant::{routes, AppState, MerchantConfig, MerchantDelegate};

const STATE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
/// Settled authorization keys outlive any authorization window a buyer signs.
const NONCE_RETENTION_SECS: u64 = 86_400;

fn build_cors(origins: &[String]) -> Cors {
    let headers = vec!["content-type", "authorization", "x-a2a-extensions"];
    if origins.is_empty() {
        Cors::default()
            .allowed_origin_fn(|origin, _| {
                origin
                    .to_str()
                    .map(|o| o == "http://localhost" || o.starts_with("http://localhost:"))
                    .unwrap_or(false)
            })
            .allow_any_method()
            .allowed_headers(headers)
            .expose_headers(vec!["x-a2a-extensions"])
            .max_age(3600)
    } else {
        let mut cors = Cors::default();
        for origin in origins {
            cors = cors.allowed_origin(origin);
        }
        cors.allow_any_method()
            .allowed_headers(headers)
            .expose_headers(vec!["x-a2a-extensions"])
            .max_age(3600)
    }
}

fn fail_config(what: &str, err: x402_a2a::X402Error) -> ! {
    tracing::error!(error = %err, "invalid {what} configuration");
    std::process::exit(1);
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = MerchantConfig::from_env().unwrap_or_else(|e| fail_config("merchant", e));
    let facilitator_config =
        FacilitatorConfig::from_env().unwrap_or_else(|e| fail_config("facilitator", e));
    let negotiator_config =
        NegotiatorConfig::from_env().unwrap_or_else(|e| fail_config("negotiator", e));

    tracing::info!(?config, ?facilitator_config, policy = ?negotiator_config.policy, "starting x402 merchant");

    let facilitator = ConfiguredFacilitator::from_config(&facilitator_config)
        .unwrap_or_else(|e| fail_config("facilitator", e));
    if let ConfiguredFacilitator::Local(local) = &facilitator {
        local.start_nonce_cleanup(NONCE_RETENTION_SECS);
    }

    let negotiator = PaymentNegotiator::new(
        MerchantDelegate::from_config(&config),
        facilitator,
        negotiator_config,
    );
    negotiator.start_cleanup(STATE_CLEANUP_INTERVAL);

    let state = web::Data::new(AppState::new(negotiator, &config));
    let cors_origins = config.allowed_origins.clone();

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(config.rate_limit_rpm)
        .finish()
        .expect("failed to build rate limiter config");

    tracing::info!("x402 merchant listening at http://0.0.0.0:{}", config.port);
    tracing::info!(
        "Endpoints: POST /tasks, GET /.well-known/agent.json, GET /health, GET /metrics"
    );
    tracing::info!("Rate limit: {} req/min per IP", config.rate_limit_rpm);

    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&cors_origins))
            .wrap(Governor::new(&governor_conf))
            .app_data(web::JsonConfig::default().limit(65_536))
            .app_data(state.clone())
            .service(routes::tasks)
            .service(routes::agent_card)
            .service(routes::health)
            .service(routes::metrics_endpoint)
    })
    .bind(("0.0.0.0", config.port))?
    .run()
    .await
}
