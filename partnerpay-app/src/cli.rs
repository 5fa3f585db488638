//! Command-line interface.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "partnerpay")]
#[command(author, version, about = "PartnerPay transaction and refund engine", long_about = None)]
pub struct Cli {
    /// Store URL: memory://, sqlite://<path> or postgres://...
    #[arg(long, global = true, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve {
        /// Register a partner at startup and print its API key.
        /// Mostly useful with the in-memory store.
        #[arg(long, env = "SEED_PARTNER_EMAIL")]
        seed_partner_email: Option<String>,
    },
    /// Partner administration
    Partner {
        #[command(subcommand)]
        action: PartnerCommand,
    },
}

impl Default for Command {
    fn default() -> Self {
        Command::Serve {
            seed_partner_email: None,
        }
    }
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum PartnerCommand {
    /// Register a partner. The API key is printed once and never stored.
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Endpoint that receives signed event notifications
        #[arg(long)]
        webhook_url: Option<String>,
        /// Requests per minute (defaults to DEFAULT_RATE_LIMIT_PER_MINUTE)
        #[arg(long)]
        rate_limit: Option<u32>,
    },
    /// Deactivate a partner; its API key stops working immediately
    Deactivate {
        /// Partner ID (UUID)
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["partnerpay"]).unwrap();
        assert_eq!(cli.command.unwrap_or_default(), Command::default());
    }

    #[test]
    fn test_partner_create_parses() {
        let cli = Cli::try_parse_from([
            "partnerpay",
            "partner",
            "create",
            "--name",
            "Acme",
            "--email",
            "ops@acme.test",
            "--webhook-url",
            "https://acme.test/hooks",
        ])
        .unwrap();

        assert_eq!(
            cli.command,
            Some(Command::Partner {
                action: PartnerCommand::Create {
                    name: "Acme".into(),
                    email: "ops@acme.test".into(),
                    webhook_url: Some("https://acme.test/hooks".into()),
                    rate_limit: None,
                }
            })
        );
    }

    #[test]
    fn test_partner_create_requires_email() {
        assert!(Cli::try_parse_from(["partnerpay", "partner", "create", "--name", "Acme"]).is_err());
    }

    #[test]
    fn test_deactivate_takes_positional_id() {
        let cli = Cli::try_parse_from([
            "partnerpay",
            "partner",
            "deactivate",
            "0b7c1a8e-7f3e-4b8e-9d6a-1f2e3d4c5b6a",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Partner {
                action: PartnerCommand::Deactivate { .. }
            })
        ));
    }
}
