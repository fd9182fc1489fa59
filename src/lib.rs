// src/lib.rs

pub mod alerts;
pub mod config;
pub mod db;
pub mod discord;
pub mod guardian;
pub mod logging;
pub mod monitor;
pub mod report;

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serenity::all::Http;

use config::Settings;
use db::{Db, PgStore};
use guardian::Guardian;

/// Globalny kontekst aplikacji: konfiguracja, DB i gotowy Guardian.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Settings,
    pub db: Db,
    pub store: PgStore,
    pub guardian: Arc<Guardian>,
}

impl AppContext {
    /// Bootstrap całej aplikacji:
    /// - logi
    /// - połączenie z DB + migracje
    /// - Guardian podpięty pod Discord (DM) i Postgres
    pub async fn bootstrap(settings: Settings) -> Result<Arc<Self>> {
        logging::init(&settings);

        let db = db::connect(
            &settings.database.url,
            settings.database.max_connections,
            settings.database.statement_timeout_ms,
        )
        .await?;
        db::migrate(&db).await?;

        let http = Arc::new(Http::new(&settings.discord.token));
        Ok(Self::assemble(settings, db, http))
    }

    /// Context over a lazily-connected pool; nothing touches the network until used.
    pub fn new_testing(settings: Settings, db: Db) -> Arc<Self> {
        Self::assemble(settings, db, Arc::new(Http::new("")))
    }

    fn assemble(settings: Settings, db: Db, http: Arc<Http>) -> Arc<Self> {
        let store = PgStore::new(db.clone());
        let notifier = Arc::new(discord::DiscordNotifier::new(http));
        let guardian = Arc::new(Guardian::from_settings(
            &settings,
            notifier,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        ));
        Arc::new(Self {
            settings,
            db,
            store,
            guardian,
        })
    }

    /// Środowisko: "production" | "development" | ...
    #[inline]
    pub fn env(&self) -> &str {
        &self.settings.env
    }
}

/// Periodically drops expired cooldown keys so the map stays bounded.
pub fn spawn_cooldown_sweeper(ctx: Arc<AppContext>) -> tokio::task::JoinHandle<()> {
    let every = Duration::from_secs(ctx.settings.alerts.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tick.tick().await;
            ctx.guardian.sweep_cooldowns(Instant::now());
        }
    })
}

/// Start klienta Discorda + sprzątanie cooldownów.
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let sweeper = spawn_cooldown_sweeper(ctx.clone());
    let res = discord::run_bot(ctx).await;
    sweeper.abort();
    res
}
