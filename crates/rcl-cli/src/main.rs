use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rcl_core::{default_config_path, DriverKind, RclConfig, ServerConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "rcl")]
#[command(about = "rcl - OpenCL devices served over the network")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the rcl server (exposes local compute devices over the network)
    Server {
        /// Port to listen on [default: 51000]
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address [default: 0.0.0.0]
        #[arg(short, long)]
        bind: Option<String>,

        /// Configuration file path (defaults to /etc/rcl/rcl.toml, then ./rcl.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Compute driver: system or simulated
        #[arg(long)]
        driver: Option<DriverKind>,

        /// Path of the OpenCL library to load instead of the system loader
        #[arg(long)]
        library: Option<String>,

        /// Write PID to this file (for service managers)
        #[arg(long)]
        pid_file: Option<PathBuf>,
    },

    /// List the platforms and devices the driver exposes on this machine
    Platforms {
        /// Compute driver: system or simulated
        #[arg(long, default_value = "system")]
        driver: DriverKind,

        /// Path of the OpenCL library to load instead of the system loader
        #[arg(long)]
        library: Option<String>,
    },
}

/// File configuration with command-line overrides applied.
fn server_config(
    path: Option<PathBuf>,
    port: Option<u16>,
    bind: Option<String>,
    driver: Option<DriverKind>,
    library: Option<String>,
) -> anyhow::Result<ServerConfig> {
    let mut config = match path {
        Some(path) => RclConfig::load(&path)
            .with_context(|| format!("failed to load {}", path.display()))?
            .server,
        None => RclConfig::load_or_default(default_config_path()).server,
    };
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(bind) = bind {
        config.bind = bind;
    }
    if let Some(driver) = driver {
        config.driver = driver;
    }
    if library.is_some() {
        config.library_path = library;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rcl_common::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            port,
            bind,
            config,
            driver,
            library,
            pid_file,
        } => {
            let server_config = server_config(config, port, bind, driver, library)?;

            if let Some(ref path) = pid_file {
                std::fs::write(path, std::process::id().to_string())
                    .with_context(|| format!("failed to write pid file {}", path.display()))?;
            }

            info!("starting rcl server on {}:{}", server_config.bind, server_config.port);

            let server = rcl_server::RclServer::new(server_config);
            let result = server.run().await;

            if let Some(ref path) = pid_file {
                let _ = std::fs::remove_file(path);
            }

            result?;
        }

        Commands::Platforms { driver, library } => {
            let config = ServerConfig {
                driver,
                library_path: library,
                ..ServerConfig::default()
            };
            let driver = rcl_server::load_driver(&config);
            let platforms = rcl_server::discovery::discover(driver.as_ref());

            println!("{} platform(s) via {} driver", platforms.len(), driver.backend());
            for (i, p) in platforms.iter().enumerate() {
                println!();
                println!("  [{}] {}", i, p.name);
                println!("      vendor:  {}", p.vendor);
                println!("      version: {}", p.version);
                println!("      handle:  {}", p.handle);
                if p.devices.is_empty() {
                    println!("      no devices");
                }
                for (j, device) in p.devices.iter().enumerate() {
                    println!("      device {}: {}", j, device);
                }
            }
        }
    }

    Ok(())
}
