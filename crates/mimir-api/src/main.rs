// Mimir API server
//
// Exit codes: 0 normal shutdown, 1 configuration error, 2 irrecoverable
// database error at startup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mimir_api::AppContext;
use mimir_engine::EngineConfig;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mimir_api=info,mimir_engine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("mimir-api starting...");

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "configuration error");
            std::process::exit(1);
        }
    };

    let ctx = match AppContext::initialize(config).await {
        Ok(ctx) => ctx,
        Err(err) => {
            tracing::error!(error = %err, "failed to initialize engine");
            std::process::exit(2);
        }
    };

    if let Err(err) = mimir_api::serve(ctx).await {
        tracing::error!(error = %err, "server error");
        std::process::exit(1);
    }
}
