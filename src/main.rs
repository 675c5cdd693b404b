//! hcctl binary entry point.

use clap::Parser;
use homeconnect::cli::{appliance, auth, AuthCommands, Cli, Commands};
use homeconnect::HcError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match cli.config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            if let Some(hint) = e.recovery_suggestion().hint() {
                eprintln!("Hint: {hint}");
            }
            std::process::exit(1);
        }
    };

    let result = match &cli.command {
        Commands::Auth(args) => match args.command {
            AuthCommands::Login => auth::handle_login(config).await,
            AuthCommands::Status => auth::handle_status(config).await,
            AuthCommands::Logout => auth::handle_logout(config).await,
        },
        Commands::Appliances => appliance::handle_list(config).await,
        Commands::Status(args) => appliance::handle_status(config, &args.haid).await,
        Commands::Events(args) => appliance::handle_events(config, &args.haid).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        let hint = e
            .downcast_ref::<HcError>()
            .and_then(|e| e.recovery_suggestion().hint());
        if let Some(hint) = hint {
            eprintln!("Hint: {hint}");
        }
        std::process::exit(1);
    }
}
