use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thumbserve::{cache::CacheStore, config, output, pipeline::Pipeline, server};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "thumbserve")]
#[command(about = "On-demand image resizing over HTTP")]
#[command(long_about = "\
On-demand image resizing over HTTP

Serves resized JPEG, PNG and GIF images with a disk cache in front:

  GET /?source=/img/cat.png&width=200
  GET /?src=https://images.example.com/a.jpg&w=320&h=240&q=80

Parameters:
  source, src     Path below the document root, or an http(s) URL
  width, w        Target width (0 or absent = derive from height)
  height, h       Target height (0 or absent = derive from width)
  quality, q      Encoding quality 1-100

Configuration (later wins):
  built-in defaults → --config FILE → THUMBSERVE_* environment variables

Remote URLs are refused unless [remote] enabled = true.

Run 'thumbserve gen-config' to generate a documented thumbserve.toml.")]
#[command(version)]
struct Cli {
    /// Config file (TOML)
    #[arg(long, env = "THUMBSERVE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Validate configuration and print the effective settings
    Check,
    /// Print a stock config file with all options documented
    GenConfig,
    /// Delete expired cache entries
    Prune,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let config = config::load_config(cli.config.as_deref())?;
            let pipeline = Pipeline::new(config)?;
            server::serve(pipeline).await?;
        }
        Command::Check => {
            let config = config::load_config(cli.config.as_deref())?;
            output::print_config_summary(&config);
            println!("==> Configuration is valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
        Command::Prune => {
            let config = config::load_config(cli.config.as_deref())?;
            let store = CacheStore::new(&config.cache.dir, config.cache_ttl());
            let stats = store.prune()?;
            output::print_prune_summary(store.dir(), &stats);
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise 0 = info, 1 = debug, 2+ = trace.
fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("thumbserve=info,tower_http=warn"),
        1 => EnvFilter::new("thumbserve=debug,tower_http=debug"),
        _ => EnvFilter::new("thumbserve=trace,tower_http=trace"),
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
