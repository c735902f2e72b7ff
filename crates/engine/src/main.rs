use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use qr_domain::EngineConfig;
use qr_engine::{api, bootstrap};

#[derive(Parser)]
#[command(name = "quoroomd", about = "Engine for autonomous agent rooms")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine (default).
    Serve,
    /// Configuration commands.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate the resolved configuration and exit.
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config()?;
            run_server(config).await
        }
        Some(Command::Config {
            command: ConfigCommand::Validate,
        }) => {
            let config = load_config()?;
            match config.validate() {
                Ok(()) => {
                    println!("configuration ok (data dir {})", config.data_dir.display());
                    Ok(())
                }
                Err(e) => {
                    eprintln!("configuration invalid: {e}");
                    std::process::exit(1);
                }
            }
        }
        Some(Command::Version) => {
            println!("quoroomd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,qr_engine=debug")),
        )
        .init();
}

/// Process-fatal conditions abort startup with a single-line error.
fn load_config() -> anyhow::Result<EngineConfig> {
    let home = dirs::home_dir();
    EngineConfig::load(home.as_deref()).map_err(|e| anyhow::anyhow!("config: {e}"))
}

async fn run_server(config: EngineConfig) -> anyhow::Result<()> {
    tracing::info!("quoroom engine starting");
    let listen_addr = config.listen_addr.clone();

    let state = bootstrap::build_state(config, bootstrap::Collaborators::local())
        .map_err(|e| anyhow::anyhow!("startup: {e}"))?;
    bootstrap::start_background(&state).map_err(|e| anyhow::anyhow!("startup: {e}"))?;

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    let bound = listener.local_addr()?;

    // Sidecars for local clients: the bound port and the API token.
    std::fs::write(state.config.api_port_file(), bound.port().to_string())?;
    std::fs::write(state.config.api_token_file(), state.api_token.as_str())?;

    tracing::info!(addr = %bound, "listening");
    axum::serve(listener, api::router(state)).await?;
    Ok(())
}
