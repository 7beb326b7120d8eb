use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod overlay;
mod session;
mod speech;
mod store;

use config::Config;
use speech::{Announcer, CommandAnnouncer, NullAnnouncer};
use store::Store;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition classroom attendance recorder")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    conf: std::path::PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the attendance loop (the default)
    Run,
    /// Add a student to the roster, or rename an existing one
    AddStudent {
        /// Student identifier, matching the enrollment gallery label
        id: String,
        /// Display name, spoken when attendance is taken
        name: String,
    },
    /// List the enrolled roster
    Roster,
    /// Show recorded attendance for a date (YYYY-MM-DD, default today)
    Attendance { date: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.conf)
        .with_context(|| format!("loading configuration from {}", cli.conf.display()))?;

    let store = Store::open(&config.db_path).context("opening attendance database")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config, store).await,
        Commands::AddStudent { id, name } => {
            store.upsert_student(&id, &name)?;
            println!("roster: {id} -> {name}");
            Ok(())
        }
        Commands::Roster => {
            for (id, name) in store.roster()? {
                println!("{id}\t{name}");
            }
            Ok(())
        }
        Commands::Attendance { date } => {
            let date = match date {
                Some(raw) => chrono::NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .with_context(|| format!("invalid date '{raw}': expected YYYY-MM-DD"))?,
                None => chrono::Local::now().date_naive(),
            };
            for (id, marked_at) in store.attendance_on(date)? {
                println!("{date}\t{id}\t{marked_at}");
            }
            Ok(())
        }
    }
}

async fn run(config: &Config, store: Store) -> Result<()> {
    let announcer: Box<dyn Announcer + Send> = match &config.speech_command {
        Some(command) => Box::new(CommandAnnouncer::new(
            command,
            &config.speech_voice,
            config.speech_rate,
        )),
        None => {
            tracing::info!("speech disabled by configuration");
            Box::new(NullAnnouncer)
        }
    };

    let engine = engine::spawn_engine(config, store, announcer)
        .context("starting attendance engine")?;

    tracing::info!("rollcall running — Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    engine.stop();

    Ok(())
}
