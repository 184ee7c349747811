use std::sync::Arc;

use dotenv::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use car_rental_be::auth::{TokenError, TokenVerifier};
use car_rental_be::config::{Config, ConfigError};
use car_rental_be::service::clock::SystemClock;
use car_rental_be::service::payments::CheckoutOptions;
use car_rental_be::state::{AppState, Collaborators};
use car_rental_be::store::postgres::PgStore;
use car_rental_be::store::StoreError;
use car_rental_be::stripe::checkout::StripeCheckout;
use car_rental_be::stripe::signature::{SignatureError, WebhookVerifier};

const DEFAULT_LOG_FILTER: &str = "car_rental_be=info,tower_http=info";

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("AUTH_TOKEN_SECRET: {0}")]
    Token(#[from] TokenError),
    #[error("STRIPE_WEBHOOK_SECRET: {0}")]
    Webhook(#[from] SignatureError),
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server: {0}")]
    Io(#[from] std::io::Error),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    let result = if json {
        fmt().with_env_filter(filter).json().try_init()
    } else {
        fmt().with_env_filter(filter).try_init()
    };
    if let Err(err) = result {
        warn!(error = %err, "tracing init failed");
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}

async fn run() -> Result<(), StartupError> {
    let config = Config::from_env()?;
    info!(?config, "configuration loaded");

    let store = Arc::new(PgStore::connect(&config.database_url, config.database_max_connections).await?);
    store.migrate().await?;

    let state = AppState::new(Collaborators {
        store: store.clone(),
        notifications: store.clone(),
        checkout: Arc::new(StripeCheckout::new(
            &config.stripe.api_base,
            config.stripe.secret_key.clone(),
        )?),
        clock: Arc::new(SystemClock),
        tokens: TokenVerifier::new(config.auth_token_secret.as_bytes())?,
        webhooks: WebhookVerifier::new(
            config.stripe.webhook_secret.as_bytes(),
            config.stripe.webhook_tolerance_secs,
        )?,
        checkout_options: CheckoutOptions {
            currency: config.stripe.currency.clone(),
            client_url: config.client_url.clone(),
        },
    });
    let app = car_rental_be::app(state, config.static_dir.as_deref());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await;
    info!("database pool closed");
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_tracing();

    if let Err(err) = run().await {
        error!(error = %err, "server stopped");
        std::process::exit(1);
    }
}
