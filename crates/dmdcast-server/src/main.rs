use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dmdcast_core::Dmd;
use dmdcast_serial::SerialPanel;
use dmdcast_server::{DmdServer, ServerConfig};

/// Network frame server for pinball dot-matrix displays.
///
/// Accepts framed updates from producers over TCP, normalizes them and
/// drives the attached display hardware.
#[derive(Parser, Debug)]
#[command(name = "dmdcast-server", version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Fixed alt-color path, overriding paths transmitted by producers
    #[arg(long)]
    alt_color_path: Option<String>,

    /// Fixed PuP videos path, overriding paths transmitted by producers
    #[arg(long)]
    pup_videos_path: Option<String>,

    /// IP address or host name to listen on
    #[arg(long)]
    addr: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Keep retrying display discovery instead of terminating when no
    /// display is connected
    #[arg(long)]
    wait_for_displays: bool,

    /// Enable logging to stderr
    #[arg(long)]
    logging: bool,

    /// Enable verbose logging, includes normal logging
    #[arg(long)]
    verbose_logging: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose_logging {
        "debug"
    } else if cli.logging {
        "info"
    } else {
        "off"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match cli.config.as_deref().map(ServerConfig::load).transpose() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("{e:#}");
            return ExitCode::from(1);
        }
    };
    if let Some(path) = cli.alt_color_path {
        config.alt_color_path = path;
    }
    if let Some(path) = cli.pup_videos_path {
        config.pup_videos_path = path;
    }
    if let Some(addr) = cli.addr {
        config.addr = addr;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.wait_for_displays {
        config.wait_for_displays = true;
    }

    let dmd = Arc::new(Dmd::new(config.dmd.clone()));
    if !config.alt_color_path.is_empty() {
        dmd.set_rom("", Some(&config.alt_color_path), None);
    }
    if !config.pup_videos_path.is_empty() {
        dmd.set_rom("", None, Some(&config.pup_videos_path));
    }

    // Display discovery; with --wait-for-displays, keep trying until one
    // shows up.
    loop {
        if config.dmd.serial.enable && !dmd.has_display() {
            match SerialPanel::connect(&config.dmd.serial) {
                Ok(panel) => dmd.attach_backend(Box::new(panel)),
                Err(e) => tracing::info!("no serial panel: {e}"),
            }
        }
        if dmd.has_display() || !config.wait_for_displays {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    if !dmd.has_display() {
        tracing::error!("no DMD displays found");
        eprintln!("no DMD displays found");
        return ExitCode::from(2);
    }

    let server = match DmdServer::bind(
        &config.addr,
        config.port,
        Arc::clone(&dmd),
        !config.alt_color_path.is_empty(),
        !config.pup_videos_path.is_empty(),
    )
    .await
    {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("{e:#}");
            return ExitCode::from(1);
        }
    };

    let handle = server.handle();
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!("cannot listen for SIGTERM: {e}");
                return;
            }
        };
        sigterm.recv().await;
        tracing::info!("received SIGTERM, shutting down");
        handle.shutdown();
    });

    if let Err(e) = server.run().await {
        tracing::error!("server failed: {e:#}");
        return ExitCode::from(1);
    }

    // Dropping the DMD joins the pipeline worker and, through the
    // backends, each serial transmit worker.
    drop(dmd);
    ExitCode::SUCCESS
}
