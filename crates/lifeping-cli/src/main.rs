use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "lifeping", version, about = "LifePing: periodic safety check-ins")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Account, sign-in and profile
    Account {
        #[command(subcommand)]
        action: commands::account::AccountAction,
    },
    /// Check in and inspect check-in status
    Checkin {
        #[command(subcommand)]
        action: commands::checkin::CheckinAction,
    },
    /// Trusted contacts
    Contact {
        #[command(subcommand)]
        action: commands::contact::ContactAction,
    },
    /// Preferences of the signed-in user
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Background check-in monitor
    Monitor {
        #[command(subcommand)]
        action: commands::monitor::MonitorAction,
    },
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LIFEPING_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Account { action } => commands::account::run(action),
        Commands::Checkin { action } => commands::checkin::run(action),
        Commands::Contact { action } => commands::contact::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::Monitor { action } => commands::monitor::run(action),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "lifeping", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
