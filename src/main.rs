use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use demopack::{builder, dockerfile, BuildCache, Config, ImageBuilder, Manifest};

#[derive(Parser)]
#[command(name = "demopack")]
#[command(about = "Package Python web demos into runnable container images")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to demopack.toml / configs/default.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an image from an application source directory
    Build {
        /// Source directory containing app.py and requirements.txt
        source: PathBuf,
        /// Skip the build cache and rebuild unconditionally
        #[arg(long)]
        no_cache: bool,
    },
    /// Build if needed, then launch a container from the image
    Run {
        /// Source directory containing app.py and requirements.txt
        source: PathBuf,
        /// Override the listening port (passed as PORT to the container)
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        no_cache: bool,
    },
    /// Print the rendered Dockerfile without building
    Dockerfile,
    /// List the parsed dependency manifest
    Deps {
        /// Source directory containing the manifest
        source: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };

    match cli.command {
        Commands::Build { source, no_cache } => {
            ensure_docker().await;
            let mut cache = BuildCache::new(PathBuf::from(&config.cache.dir))?;
            let outcome = ImageBuilder::new(config)
                .build(&source, &mut cache, no_cache)
                .await?;
            if outcome.cached {
                info!("Image up to date: {}", outcome.image_tag);
            } else {
                info!("Image built: {}", outcome.image_tag);
            }
            println!("{}", outcome.image_tag);
        }
        Commands::Run {
            source,
            port,
            no_cache,
        } => {
            ensure_docker().await;
            let mut cache = BuildCache::new(PathBuf::from(&config.cache.dir))?;
            let declared_port = config.app.port;
            let outcome = ImageBuilder::new(config)
                .build(&source, &mut cache, no_cache)
                .await?;
            let code =
                demopack::launcher::run_container(&outcome.image_tag, declared_port, port).await?;
            if code != 0 {
                error!("Container exited with code {}", code);
            }
            std::process::exit(code);
        }
        Commands::Dockerfile => {
            print!("{}", dockerfile::render(&config.image, &config.app));
        }
        Commands::Deps { source } => {
            let manifest = Manifest::load(&source, &config.app.manifest)?;
            for option in &manifest.options {
                println!("{option}");
            }
            for requirement in &manifest.requirements {
                match &requirement.pin {
                    Some(pin) => println!("{} (pinned: {})", requirement.name, pin),
                    None => println!("{}", requirement.name),
                }
            }
            info!("Manifest SHA256: {}", manifest.sha256);
        }
    }

    Ok(())
}

async fn ensure_docker() {
    if !builder::docker_available().await {
        error!("Docker is not running or not accessible");
        error!("Please ensure Docker is installed and running");
        std::process::exit(1);
    }
}
