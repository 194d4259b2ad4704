//! TaskMaster - HTTP backend for the to-do list.

use taskmaster::{api, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskmaster=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!(
        supabase = %config.supabase.url,
        model = %config.gemini.model,
        working_dir = %config.working_dir.display(),
        "Starting TaskMaster"
    );

    api::serve(config).await?;

    Ok(())
}
