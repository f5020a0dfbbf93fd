use farmgate::{App, AppContext, ConfigBuilder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigBuilder::new().from_env().build()?;
    farmgate::init_tracing_with_config(&config);

    tracing::info!(
        removal_policy = ?config.ratings.removal_policy,
        trial_days = config.subscriptions.trial_days,
        grace_period_days = config.subscriptions.grace_period_days,
        "Starting farmgate"
    );

    let context = AppContext::in_memory(config);
    let farms = context.register_configured_farms().await?;
    tracing::info!(farms, "Registered configured farms");

    App::new(context).serve().await?;
    Ok(())
}
