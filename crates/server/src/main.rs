use fortress_id::AppResources;
use fortress_id::api::start_webserver;
use fortress_id::config::load_config;
use fortress_id::oauth2::OAuth2State;
use fortress_id::oauth2::bootstrap;
use fortress_id::oauth2::codec::TokenCodec;
use fortress_id::oauth2::directory::DbUserDirectory;
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::time::{Duration, interval};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_standard_tracing() {
    let default_directives = "fortress_id=info,tower_http=info,sea_orm=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    initialize_standard_tracing();

    let config = Arc::new(load_config()?);
    tracing::info!(
        issuer = %config.issuer(),
        environment = ?config.environment,
        allow_insecure_http = config.security.allow_insecure_http,
        "Loaded configuration"
    );
    if config.security.allow_insecure_http {
        tracing::warn!("Insecure HTTP is allowed; do not use this setting in production");
    }

    let db = Arc::new(Database::connect(&config.database_url).await?);
    if config.auto_migrate {
        tracing::info!("Applying pending migrations");
        Migrator::up(db.as_ref(), None).await?;
    }

    // A missing or invalid signing key is fatal
    let codec = TokenCodec::from_config(&config)?;
    let state = OAuth2State::new(db.clone(), config.clone(), codec);

    let directory = DbUserDirectory::new(db.clone(), config.lockout.clone());
    let report = bootstrap::run(&config, &state.registry, &directory).await?;
    if report.client_created || report.admin_created {
        tracing::info!(
            client_created = report.client_created,
            admin_created = report.admin_created,
            "Seeded development data"
        );
    }

    // Periodically drop expired codes, refresh tokens and empty families
    {
        let store = state.store.clone();
        let period = Duration::from_secs(config.oauth2.purge_interval.max(1));
        tokio::spawn(async move {
            let mut interval = interval(period);
            loop {
                interval.tick().await;
                match store.purge_expired(OffsetDateTime::now_utc()).await {
                    Ok(stats) => tracing::debug!(
                        codes = stats.codes,
                        refresh_tokens = stats.refresh_tokens,
                        families = stats.families,
                        "Purged expired grants"
                    ),
                    Err(e) => tracing::warn!(error = %e, "Failed to purge expired grants"),
                }
            }
        });
    }

    let resources = AppResources { db, config };
    start_webserver(state, resources).await?;
    Ok(())
}
