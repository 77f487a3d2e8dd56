// Copyright 2024 Colin Marc <hi@colinmarc.com>
//
// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use wevp_client::{
    config::{Config, Scenario},
    logging::init_logging,
    paint::LinePainter,
    wayland::{Endpoint, WaylandClient},
    Capability,
};

const WANTED: &[Capability] = &[Capability::Compositor, Capability::Shm, Capability::Shell];
const REQUIRED: &[Capability] = &[Capability::Compositor, Capability::Shm];

#[derive(Debug, Parser)]
#[command(name = "wevp-line")]
#[command(about = "Draws scrolling lines into shared-memory windows", long_about = None)]
struct Cli {
    /// The compositor to connect to: a socket name in $XDG_RUNTIME_DIR, an
    /// absolute path, or fd:N. Overrides DEMO_DISPLAY and WAYLAND_DISPLAY.
    #[arg(long, value_name = "DISPLAY")]
    display: Option<String>,
    /// The path to a config file. By default, $XDG_CONFIG_HOME/wevp/wevp.{toml,json} is used (if present).
    #[arg(short = 'C', long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging("wevp-line")?;

    let cfg = Config::new(args.config.as_ref(), Scenario::Line).context("failed to read config")?;
    let display = cfg.resolve_display(args.display.as_deref(), Scenario::Line, |var| {
        std::env::var(var).ok()
    });

    let endpoint: Endpoint = display.parse()?;
    let painter = LinePainter::new(cfg.painter.margin, cfg.painter.line_width);

    let mut client = WaylandClient::connect(&endpoint, WANTED, Box::new(painter))
        .context("failed to connect to compositor")?;
    client.discover().context("capability discovery failed")?;
    client
        .require(REQUIRED)
        .context("compositor is missing required globals")?;

    for window in &cfg.windows {
        client
            .create_window(window)
            .with_context(|| format!("failed to create window {:?}", window.title))?;
    }

    let closer = client.closer();
    ctrlc::set_handler(move || {
        debug!("received SIGINT");
        closer.close();
    })?;

    info!(windows = cfg.windows.len(), "running");
    client.run().context("connection closed")?;

    Ok(())
}
