use crate::{api, cli::telemetry, oauth2};
use anyhow::{Context, Result};
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub dsn: String,
    pub issuer: String,
    pub id: String,
    pub name: String,
    pub redirect_uri: String,
}

/// Register the client and print its secret to stdout.
/// # Errors
/// Returns an error if the database is unreachable or the client cannot be registered.
pub async fn execute(args: Args) -> Result<()> {
    let result = register(&args).await;

    telemetry::shutdown_tracer();

    let secret = result?;
    println!("{secret}");
    Ok(())
}

async fn register(args: &Args) -> Result<String> {
    let store = api::connect(&args.dsn).await?;
    let secret = oauth2::register_client(
        &store,
        &args.issuer,
        &args.id,
        &args.name,
        &args.redirect_uri,
    )
    .await
    .with_context(|| format!("Failed to register client {}", args.id))?;
    info!(client_id = %args.id, "client registered");
    Ok(secret)
}
