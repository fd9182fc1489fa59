use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use sqlx::{
    Pool, Postgres,
    postgres::{PgConnectOptions, PgPoolOptions},
};

use crate::guardian::{EventSink, RoomDirectory, SuspiciousEvent};

pub type Db = Pool<Postgres>;

const RECIPIENT_TTL: Duration = Duration::from_secs(300);

pub async fn connect(url: &str, max: Option<u32>, statement_timeout_ms: Option<u64>) -> Result<Db> {
    let pool = PgPoolOptions::new()
        .max_connections(max.unwrap_or(10))
        .connect_with(connect_options(url, statement_timeout_ms)?)
        .await?;

    Ok(pool)
}

/// Pool that connects on first use (tests, offline tooling).
pub fn connect_lazy(url: &str, max: Option<u32>, statement_timeout_ms: Option<u64>) -> Result<Db> {
    let pool = PgPoolOptions::new()
        .max_connections(max.unwrap_or(1))
        .connect_lazy_with(connect_options(url, statement_timeout_ms)?);
    Ok(pool)
}

/// Parsed URL plus `statement_timeout` sent as a startup parameter on every connection.
pub fn connect_options(url: &str, statement_timeout_ms: Option<u64>) -> Result<PgConnectOptions> {
    let opts: PgConnectOptions = url.parse()?;
    Ok(match statement_timeout_ms {
        Some(ms) if ms > 0 => opts.options([("statement_timeout", ms)]),
        _ => opts,
    })
}

pub async fn migrate(pool: &Db) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Insert or refresh a community row (called when the bot sees the room).
pub async fn upsert_community(
    db: &Db,
    room_id: u64,
    title: &str,
    owner_id: Option<u64>,
    has_full_permissions: bool,
) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO warden.communities (room_id, title, owner_id, has_full_permissions)
           VALUES ($1, $2, $3, $4)
           ON CONFLICT (room_id) DO UPDATE
             SET title = EXCLUDED.title,
                 owner_id = EXCLUDED.owner_id,
                 has_full_permissions = EXCLUDED.has_full_permissions,
                 updated_at = now()"#,
    )
    .bind(room_id as i64)
    .bind(title)
    .bind(owner_id.map(|v| v as i64))
    .bind(has_full_permissions)
    .execute(db)
    .await?;
    Ok(())
}

/// Store one flagged message; returns the row id.
pub async fn insert_suspicious_event(db: &Db, ev: &SuspiciousEvent) -> Result<i64> {
    let rec: (i64,) = sqlx::query_as(
        r#"INSERT INTO warden.suspicious_activities
             (room_id, actor_id, actor_username, activity_type, description, reasons, message_content)
           VALUES ($1, $2, $3, $4, $5, $6, $7)
           RETURNING id"#,
    )
    .bind(ev.room_id as i64)
    .bind(ev.actor_id as i64)
    .bind(ev.actor_username.as_deref())
    .bind(&ev.category)
    .bind(&ev.description)
    .bind(sqlx::types::Json(&ev.reasons))
    .bind(&ev.content)
    .fetch_one(db)
    .await?;
    Ok(rec.0)
}

/// Owner of the room, unless alerts to the owner were switched off.
pub async fn room_alert_recipient(db: &Db, room_id: u64) -> Result<Option<u64>> {
    let row: Option<(Option<i64>,)> = sqlx::query_as(
        r#"SELECT c.owner_id
           FROM warden.communities c
           LEFT JOIN warden.alert_settings s ON s.room_id = c.room_id
           WHERE c.room_id = $1 AND COALESCE(s.alert_owner, TRUE)"#,
    )
    .bind(room_id as i64)
    .fetch_optional(db)
    .await?;
    Ok(row.and_then(|(owner,)| owner).map(|v| v as u64))
}

/// Per-room alert settings; a missing row means defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertSettings {
    pub alert_owner: bool,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self { alert_owner: true }
    }
}

pub async fn alert_settings(db: &Db, room_id: u64) -> Result<AlertSettings> {
    let row: Option<(bool,)> =
        sqlx::query_as(r#"SELECT alert_owner FROM warden.alert_settings WHERE room_id = $1"#)
            .bind(room_id as i64)
            .fetch_optional(db)
            .await?;
    Ok(row
        .map(|(alert_owner,)| AlertSettings { alert_owner })
        .unwrap_or_default())
}

pub async fn set_alert_owner(db: &Db, room_id: u64, enabled: bool) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO warden.alert_settings (room_id, alert_owner)
           VALUES ($1, $2)
           ON CONFLICT (room_id) DO UPDATE
             SET alert_owner = EXCLUDED.alert_owner,
                 updated_at = now()"#,
    )
    .bind(room_id as i64)
    .bind(enabled)
    .execute(db)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActorStat {
    pub actor_id: u64,
    pub username: Option<String>,
    pub events: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomStats {
    pub total_events: i64,
    pub distinct_actors: i64,
    pub top_actors: Vec<ActorStat>,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Aggregates flagged events for `room_id` since `since`.
pub async fn room_stats(db: &Db, room_id: u64, since: DateTime<Utc>) -> Result<RoomStats> {
    let (total_events, distinct_actors, last_event_at): (i64, i64, Option<DateTime<Utc>>) =
        sqlx::query_as(
            r#"SELECT COUNT(*), COUNT(DISTINCT actor_id), MAX(created_at)
               FROM warden.suspicious_activities
               WHERE room_id = $1 AND created_at >= $2"#,
        )
        .bind(room_id as i64)
        .bind(since)
        .fetch_one(db)
        .await?;

    let rows = sqlx::query_as::<_, (i64, Option<String>, i64)>(
        r#"SELECT actor_id, MAX(actor_username), COUNT(*) AS n
           FROM warden.suspicious_activities
           WHERE room_id = $1 AND created_at >= $2
           GROUP BY actor_id
           ORDER BY n DESC, actor_id
           LIMIT 5"#,
    )
    .bind(room_id as i64)
    .bind(since)
    .fetch_all(db)
    .await?;

    Ok(RoomStats {
        total_events,
        distinct_actors,
        top_actors: rows
            .into_iter()
            .map(|(actor_id, username, events)| ActorStat {
                actor_id: actor_id as u64,
                username,
                events,
            })
            .collect(),
        last_event_at,
    })
}

/* =========================================
   PgStore – implementacja seamów Guardiana
   ========================================= */

#[derive(Clone)]
pub struct PgStore {
    db: Db,
    recipients: Cache<u64, Option<u64>>,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            recipients: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(RECIPIENT_TTL)
                .build(),
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub async fn upsert_community(
        &self,
        room_id: u64,
        title: &str,
        owner_id: Option<u64>,
        has_full_permissions: bool,
    ) -> Result<()> {
        upsert_community(&self.db, room_id, title, owner_id, has_full_permissions).await?;
        self.recipients.invalidate(&room_id).await;
        Ok(())
    }

    /// Persist the toggle and drop the cached recipient so the next alert sees it.
    pub async fn set_alert_owner(&self, room_id: u64, enabled: bool) -> Result<()> {
        set_alert_owner(&self.db, room_id, enabled).await?;
        self.recipients.invalidate(&room_id).await;
        Ok(())
    }
}

#[async_trait]
impl EventSink for PgStore {
    async fn record(&self, event: &SuspiciousEvent) -> Result<()> {
        insert_suspicious_event(&self.db, event).await?;
        Ok(())
    }
}

#[async_trait]
impl RoomDirectory for PgStore {
    async fn alert_recipient(&self, room_id: u64) -> Result<Option<u64>> {
        if let Some(hit) = self.recipients.get(&room_id).await {
            return Ok(hit);
        }
        let owner = room_alert_recipient(&self.db, room_id).await?;
        self.recipients.insert(room_id, owner).await;
        Ok(owner)
    }
}
