use anyhow::Result;
use std::sync::Arc;
use chat_warden::{config::Settings, AppContext, run};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    let ctx: Arc<AppContext> = AppContext::bootstrap(settings).await?;
    tracing::info!(env = ctx.env(), "chat warden bootstrapped");
    run(ctx).await
}
