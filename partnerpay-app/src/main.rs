//! # PartnerPay Application
//!
//! Binary that wires together all the components:
//! - Load configuration from environment
//! - Initialize the store adapter
//! - Create the payment service and the webhook dispatcher
//! - Start the HTTP server, or run an operator command

mod cli;
mod config;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::json;

use partnerpay_hex::{
    PaymentService,
    inbound::HttpServer,
    outbound::{NotificationQueue, ProviderRouter, WebhookDispatcher},
};
use partnerpay_repo::{Repo, build_repo};
use partnerpay_types::{NewPartner, PartnerId, PartnerRepository};

use cli::{Cli, Command, PartnerCommand};
use config::Config;

/// How long the dispatcher may keep delivering queued webhooks after the server stops.
const WEBHOOK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    let telemetry = telemetry::init(&config)?;

    let result = match cli.command.unwrap_or_default() {
        Command::Serve { seed_partner_email } => serve(&config, seed_partner_email).await,
        Command::Partner { action } => run_partner_command(&config, action).await,
    };

    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }

    // Ensure traces are flushed before exit
    telemetry.shutdown();
    result
}

async fn open_store(config: &Config) -> anyhow::Result<Repo> {
    // Build repository (handles connection and migration)
    let repo = build_repo(&config.database_url)
        .await
        .with_context(|| format!("failed to open store {}", config.database_url))?;
    tracing::info!(backend = repo.backend(), "store ready");
    Ok(repo)
}

async fn serve(config: &Config, seed_partner_email: Option<String>) -> anyhow::Result<()> {
    tracing::info!("Starting PartnerPay server on port {}", config.port);

    let repo = Arc::new(open_store(config).await?);

    if let Some(email) = seed_partner_email {
        let (partner, api_key) = repo
            .create_partner(NewPartner {
                name: "seed".into(),
                email,
                webhook_url: None,
                rate_limit_per_minute: config.default_rate_limit_per_minute,
            })
            .await?;
        tracing::info!(partner_id = %partner.id, "seed partner registered");
        println!("seed partner {} api key: {}", partner.id, api_key);
    }

    let (queue, rx) = NotificationQueue::bounded(config.webhook_queue_capacity);
    let dispatcher = WebhookDispatcher::new(repo.clone(), rx, config.webhook_timeout)?;
    let dispatcher = tokio::spawn(dispatcher.run());

    let service = PaymentService::new(
        repo.clone(),
        Arc::new(ProviderRouter::with_mock_gateways()),
        repo.clone(),
        Some(queue),
    );

    // Create and run the HTTP server
    let server = HttpServer::new(service);
    let addr = format!("0.0.0.0:{}", config.port);
    server.run(&addr).await?;

    // The server owned the last queue handle; the dispatcher stops once drained.
    if tokio::time::timeout(WEBHOOK_DRAIN_TIMEOUT, dispatcher)
        .await
        .is_err()
    {
        tracing::warn!("webhook dispatcher did not drain in time; pending notifications dropped");
    }
    Ok(())
}

async fn run_partner_command(config: &Config, action: PartnerCommand) -> anyhow::Result<()> {
    let repo = open_store(config).await?;
    if matches!(repo, Repo::Memory(_)) {
        tracing::warn!("the in-memory store is not persistent; changes are lost on exit");
    }

    match action {
        PartnerCommand::Create {
            name,
            email,
            webhook_url,
            rate_limit,
        } => {
            let (partner, api_key) = repo
                .create_partner(NewPartner {
                    name,
                    email,
                    webhook_url,
                    rate_limit_per_minute: rate_limit
                        .unwrap_or(config.default_rate_limit_per_minute),
                })
                .await?;

            let webhook_secret = partner.webhook_secret.clone();
            let output = json!({
                "partner": partner,
                "api_key": api_key,
                "webhook_secret": webhook_secret,
                "note": "Save the API key and webhook secret now; the key is not shown again.",
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        PartnerCommand::Deactivate { id } => {
            let id: PartnerId = id
                .parse()
                .with_context(|| format!("invalid partner ID {id:?}"))?;
            if !repo.set_partner_active(id, false).await? {
                anyhow::bail!("partner {id} not found");
            }
            println!("✓ partner {id} deactivated");
        }
    }
    Ok(())
}
