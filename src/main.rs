// ABOUTME: Entry point for parley: a console driver for the dialogue-turn core.
// ABOUTME: Parses CLI args, loads config and .env, sets up logging, and launches the app.

use std::path::PathBuf;

use clap::Parser;

use parley::app::{App, SessionProfile};
use parley::config::Config;

/// Run dialogue turns from stdin against a local echo model.
#[derive(Debug, Parser)]
#[command(name = "parley", version, about)]
struct Args {
    /// Config file (defaults to the user config dir).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Device id of the session.
    #[arg(long, default_value = "00:00:00:00:00:00")]
    device: String,

    /// Device location, used in the role prompt.
    #[arg(long)]
    location: Option<String>,

    /// Role id of the session.
    #[arg(long, default_value_t = 1)]
    role: i64,

    /// Role name.
    #[arg(long, default_value = "assistant")]
    role_name: String,

    /// Role description, used as the system prompt.
    #[arg(long)]
    role_description: Option<String>,

    /// Start without loading stored history.
    #[arg(long)]
    fresh: bool,

    /// Print replies as they stream in.
    #[arg(long)]
    stream: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;
    parley::logging::init(&config.logging.filter);

    let profile = SessionProfile {
        device_id: args.device,
        location: args.location,
        role_id: args.role,
        role_name: args.role_name,
        role_description: args.role_description,
    };
    App::new(config, profile, args.fresh, args.stream).run().await
}
