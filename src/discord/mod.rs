// src/discord/mod.rs
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;

use serenity::all::{
    ChannelId, CommandDataOption, CommandDataOptionValue, CommandInteraction, CommandOptionType,
    Context, CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseMessage, CreateMessage, EventHandler, GatewayIntents, Guild, GuildId,
    Http, Interaction, Message, Permissions, Ready, UserId,
};

use serenity::http::HttpError;

use crate::alerts::{DispatchError, Notifier};
use crate::monitor::{self, ActorInfo};
use crate::{db, report, AppContext};

const DISCORD_MAX_CONTENT: usize = 2000;
const REPORT_COMMAND: &str = "guard-report";
const SETTINGS_COMMAND: &str = "guard-settings";
const OPT_ALERT_OWNER: &str = "alert_owner";

/// Uprawnienia, bez których ochrona działa tylko częściowo.
pub fn required_permissions() -> Permissions {
    Permissions::MANAGE_MESSAGES
        | Permissions::BAN_MEMBERS
        | Permissions::CREATE_INSTANT_INVITE
        | Permissions::MANAGE_GUILD
}

/* ============================================================
   Notifier (DM do właściciela / kanał systemowy gildii)
   ============================================================ */

pub struct DiscordNotifier {
    http: Arc<Http>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send_direct(&self, target_id: u64, text: &str) -> Result<(), DispatchError> {
        if target_id == 0 {
            return Err(DispatchError::InvalidRecipient(target_id));
        }
        let ch = UserId::new(target_id)
            .create_dm_channel(&self.http)
            .await
            .map_err(|e| dm_error(target_id, e))?;
        ch.id
            .send_message(&self.http, CreateMessage::new().content(clamp(text, DISCORD_MAX_CONTENT)))
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn send_to_room(&self, room_id: u64, text: &str) -> Result<(), DispatchError> {
        if room_id == 0 {
            return Err(DispatchError::NoRoomChannel(room_id));
        }
        let guild = GuildId::new(room_id)
            .to_partial_guild(&self.http)
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        let channel: ChannelId = guild
            .system_channel_id
            .ok_or(DispatchError::NoRoomChannel(room_id))?;
        channel
            .send_message(&self.http, CreateMessage::new().content(clamp(text, DISCORD_MAX_CONTENT)))
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        Ok(())
    }
}

/// 4xx od Discorda = odbiorca nieosiągalny; reszta to błąd transportu.
fn dm_error(target_id: u64, e: serenity::Error) -> DispatchError {
    match &e {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(resp))
            if resp.status_code.is_client_error() =>
        {
            DispatchError::InvalidRecipient(target_id)
        }
        _ => DispatchError::Transport(e.to_string()),
    }
}

fn clamp(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/* ============================================================
   Mapowanie wiadomości Discorda -> monitor::Message
   ============================================================ */

pub fn to_core_message(msg: &Message, guild_id: GuildId, room_title: Option<String>) -> monitor::Message {
    let display_name = msg
        .member
        .as_ref()
        .and_then(|m| m.nick.clone())
        .or_else(|| msg.author.global_name.clone())
        .unwrap_or_else(|| msg.author.name.clone());

    let timestamp = DateTime::<Utc>::from_timestamp(msg.timestamp.unix_timestamp(), 0)
        .unwrap_or_else(Utc::now);

    monitor::Message {
        actor: ActorInfo {
            id: msg.author.id.get(),
            display_name,
            username: Some(msg.author.name.clone()),
            first_name: msg.author.global_name.clone(),
            last_name: None,
        },
        room_id: guild_id.get(),
        room_title,
        text: (!msg.content.is_empty()).then(|| msg.content.clone()),
        caption: None,
        timestamp,
    }
}

/* ============================================================
   EventHandler
   ============================================================ */

pub struct Handler {
    pub app: Arc<AppContext>,
}

#[serenity::async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(guilds = ready.guilds.len(), "Logged in as {}", ready.user.name);
    }

    async fn guild_create(&self, ctx: Context, guild: Guild, is_new: Option<bool>) {
        let gid = guild.id.get();
        let me = ctx.cache.current_user().id;

        let has_full = guild
            .members
            .get(&me)
            .map(|m| {
                let p = guild.member_permissions(m);
                p.administrator() || p.contains(required_permissions())
            })
            .unwrap_or(false);

        if let Err(e) = self
            .app
            .store
            .upsert_community(gid, &guild.name, Some(guild.owner_id.get()), has_full)
            .await
        {
            tracing::warn!(error=?e, gid, "upsert_community failed");
        }

        if let Err(e) = register_commands(&ctx, guild.id).await {
            tracing::warn!(error=?e, gid, "register_commands failed");
        }

        // tylko przy świeżym dodaniu bota, nie przy każdym starcie
        if is_new == Some(true) && !has_full {
            self.app.guardian.request_elevated_access(gid).await;
        }

        tracing::info!(guild=%guild.name, gid, has_full, "guild ready");
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let Some(gid) = msg.guild_id else {
            return;
        };
        if msg.author.bot {
            return;
        }

        let title = ctx.cache.guild(gid).map(|g| g.name.clone());
        let core = to_core_message(&msg, gid, title);

        let fut = self.app.guardian.handle_message(&core);
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(outcome) => {
                tracing::debug!(gid = gid.get(), uid = core.actor.id, ?outcome, "message processed");
            }
            Err(_) => {
                tracing::error!(gid = gid.get(), uid = core.actor.id, "guardian panicked while handling message");
            }
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(cmd) = interaction else {
            return;
        };
        let res = match cmd.data.name.as_str() {
            REPORT_COMMAND => handle_report(&ctx, &self.app, &cmd).await,
            SETTINGS_COMMAND => handle_settings(&ctx, &self.app, &cmd).await,
            _ => return,
        };
        if let Err(e) = res {
            tracing::warn!(error=?e, command = %cmd.data.name, "command failed");
            respond_ephemeral(&ctx, &cmd, "❌ Command failed, try again later.").await;
        }
    }
}

async fn handle_report(ctx: &Context, app: &AppContext, cmd: &CommandInteraction) -> Result<()> {
    let Some(gid) = cmd.guild_id else {
        respond_ephemeral(ctx, cmd, "This command works only inside a server.").await;
        return Ok(());
    };
    let since = Utc::now() - chrono::Duration::hours(24);
    let stats = db::room_stats(&app.db, gid.get(), since).await?;
    let title = ctx
        .cache
        .guild(gid)
        .map(|g| g.name.clone())
        .unwrap_or_else(|| gid.get().to_string());
    let text = report::render_room_report(&title, &stats, "last 24h");
    respond_ephemeral(ctx, cmd, &clamp(&text, DISCORD_MAX_CONTENT)).await;
    Ok(())
}

async fn handle_settings(ctx: &Context, app: &AppContext, cmd: &CommandInteraction) -> Result<()> {
    let Some(gid) = cmd.guild_id else {
        respond_ephemeral(ctx, cmd, "This command works only inside a server.").await;
        return Ok(());
    };

    let requested = alert_owner_option(&cmd.data.options);
    if let Some(enabled) = requested {
        app.store.set_alert_owner(gid.get(), enabled).await?;
        tracing::info!(gid = gid.get(), uid = cmd.user.id.get(), enabled, "owner alerts toggled");
    }

    let current = db::alert_settings(&app.db, gid.get()).await?;
    let title = ctx
        .cache
        .guild(gid)
        .map(|g| g.name.clone())
        .unwrap_or_else(|| gid.get().to_string());
    let text = report::render_alert_settings(
        &title,
        &current,
        app.guardian.gate().policy(),
        requested.is_some(),
    );
    respond_ephemeral(ctx, cmd, &text).await;
    Ok(())
}

fn alert_owner_option(options: &[CommandDataOption]) -> Option<bool> {
    options.iter().find_map(|o| match (o.name.as_str(), &o.value) {
        (OPT_ALERT_OWNER, CommandDataOptionValue::Boolean(b)) => Some(*b),
        _ => None,
    })
}

async fn respond_ephemeral(ctx: &Context, cmd: &CommandInteraction, msg: &str) {
    let _ = cmd
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(msg)
                    .ephemeral(true),
            ),
        )
        .await;
}

async fn register_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id
        .create_command(
            &ctx.http,
            CreateCommand::new(REPORT_COMMAND)
                .description("Suspicious activity summary for the last 24 hours")
                .default_member_permissions(Permissions::MANAGE_GUILD),
        )
        .await?;
    guild_id
        .create_command(
            &ctx.http,
            CreateCommand::new(SETTINGS_COMMAND)
                .description("Show or change alert settings for this server")
                .default_member_permissions(Permissions::MANAGE_GUILD)
                .add_option(
                    CreateCommandOption::new(
                        CommandOptionType::Boolean,
                        OPT_ALERT_OWNER,
                        "Send security alerts to the server owner",
                    )
                    .required(false),
                ),
        )
        .await?;
    Ok(())
}

fn intents_from_settings(names: &[String]) -> GatewayIntents {
    let mut i = GatewayIntents::empty();
    for n in names {
        match n.as_str() {
            "GUILDS" => i |= GatewayIntents::GUILDS,
            "GUILD_MEMBERS" => i |= GatewayIntents::GUILD_MEMBERS,
            "GUILD_MESSAGES" => i |= GatewayIntents::GUILD_MESSAGES,
            "MESSAGE_CONTENT" => i |= GatewayIntents::MESSAGE_CONTENT,
            other => tracing::warn!(intent = other, "unknown gateway intent ignored"),
        }
    }
    i
}

pub async fn run_bot(ctx: Arc<AppContext>) -> Result<()> {
    let token = &ctx.settings.discord.token;
    if token.is_empty() {
        anyhow::bail!("Brak tokenu Discord (WARDEN_DISCORD__TOKEN). Uzupełnij w .env.");
    }

    let intents = intents_from_settings(&ctx.settings.discord.intents);

    let handler = Handler { app: ctx.clone() };

    let mut client = serenity::Client::builder(token, intents)
        .event_handler(handler)
        .await?;

    tracing::info!("Discord client starting…");
    client.start().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_respects_limit() {
        assert_eq!(clamp("abc", 5), "abc");
        let long = "x".repeat(2500);
        let out = clamp(&long, DISCORD_MAX_CONTENT);
        assert_eq!(out.chars().count(), DISCORD_MAX_CONTENT);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn intents_are_mapped() {
        let i = intents_from_settings(&["GUILDS".into(), "MESSAGE_CONTENT".into(), "BOGUS".into()]);
        assert!(i.contains(GatewayIntents::GUILDS | GatewayIntents::MESSAGE_CONTENT));
        assert!(!i.contains(GatewayIntents::GUILD_MEMBERS));
    }

    #[test]
    fn required_permissions_cover_moderation() {
        let p = required_permissions();
        assert!(p.manage_messages() && p.ban_members() && p.manage_guild());
    }

    #[test]
    fn dm_network_failure_is_transport_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        match dm_error(7, serenity::Error::Io(io)) {
            DispatchError::Transport(msg) => assert!(msg.contains("connection reset")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn notifier_rejects_zero_ids_without_network() {
        let n = DiscordNotifier::new(Arc::new(Http::new("")));
        assert!(matches!(n.send_direct(0, "x").await, Err(DispatchError::InvalidRecipient(0))));
        assert!(matches!(n.send_to_room(0, "x").await, Err(DispatchError::NoRoomChannel(0))));
    }
}
