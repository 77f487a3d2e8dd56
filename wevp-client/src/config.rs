// Copyright 2024 Colin Marc <hi@colinmarc.com>
//
// SPDX-License-Identifier: MIT

use anyhow::{bail, Context};
use lazy_static::lazy_static;
use tracing::trace;

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

lazy_static! {
    static ref DEFAULT_CFG: parsed::Config =
        toml::from_str(include_str!("../wevp.default.toml")).unwrap();
}

/// Serde representations of the configuration files.
mod parsed {
    use converge::Converge;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Deserialize, Converge)]
    #[serde(deny_unknown_fields)]
    pub(super) struct Config {
        pub(super) display: Option<String>,
        pub(super) windows: Option<Vec<WindowConfig>>,

        #[converge(nest)]
        pub(super) painter: Option<PainterConfig>,
    }

    #[derive(Debug, Clone, PartialEq, Deserialize, Converge)]
    #[serde(deny_unknown_fields)]
    pub(super) struct PainterConfig {
        pub(super) margin: Option<u32>,
        pub(super) line_width: Option<u32>,
    }

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub(super) struct WindowConfig {
        pub(super) title: Option<String>,
        pub(super) width: u32,
        pub(super) height: u32,
        pub(super) scale: Option<u32>,
    }
}

/// Which of the two programs is running. They share a configuration file, but
/// not every setting applies to both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Eagerly created toplevel windows.
    Line,
    /// Views created on request by the embedding extension.
    Embed,
}

impl Scenario {
    pub fn default_display(&self) -> &'static str {
        match self {
            Scenario::Line => "wayland-weston",
            Scenario::Embed => "wevf-demo",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub display: Option<String>,
    pub painter: PainterConfig,
    pub windows: Vec<WindowConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PainterConfig {
    pub margin: u32,
    pub line_width: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub scale: u32,
}

impl Config {
    pub fn new(path: Option<&PathBuf>, scenario: Scenario) -> anyhow::Result<Config> {
        let file = path
            .map(|p| p.to_owned())
            .or_else(locate_default_config_file);

        let cfg = match file {
            Some(file) => Some(
                read_file(&file)
                    .context(format!("parsing configuration file {}", file.display()))?,
            ),
            None => None,
        };

        let this = Self::build(cfg)?;
        this.validate(scenario)?;

        Ok(this)
    }

    fn build(cfg: Option<parsed::Config>) -> anyhow::Result<Self> {
        // This is the parsed wevp.default.toml.
        let defaults = DEFAULT_CFG.clone();

        let input = if let Some(cfg) = cfg {
            // Merge the default config with the input config, giving the input
            // precedence.
            use converge::Converge;
            cfg.converge(defaults)
        } else {
            defaults
        };

        // We only unwrap values that should have been set in the default
        // config. This is verified by a test.
        let painter = input.painter.unwrap();

        let windows = input
            .windows
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(idx, w)| WindowConfig {
                title: w.title.unwrap_or_else(|| format!("Window {}", idx + 1)),
                width: w.width,
                height: w.height,
                scale: w.scale.unwrap_or(1),
            })
            .collect();

        let this = Config {
            display: input.display,
            painter: PainterConfig {
                margin: painter.margin.unwrap(),
                line_width: painter.line_width.unwrap(),
            },
            windows,
        };

        trace!("using config: {:#?}", this);

        Ok(this)
    }

    /// Performs high-level validation on the final configuration.
    fn validate(&self, scenario: Scenario) -> anyhow::Result<()> {
        if self.painter.line_width == 0 {
            bail!("line_width must be positive");
        }

        if scenario == Scenario::Line && self.windows.is_empty() {
            bail!("at least one window must be defined");
        }

        for window in &self.windows {
            if window.width == 0 || window.height == 0 {
                bail!("empty size for window {:?}", window.title);
            }

            if window.scale == 0 {
                bail!("zero scale for window {:?}", window.title);
            }
        }

        if let Some(display) = &self.display {
            if display.is_empty() {
                bail!("display must not be empty");
            }
        }

        Ok(())
    }

    /// Picks the compositor endpoint. The command line flag wins, then the
    /// environment, then the config file, then the per-program default.
    pub fn resolve_display<F>(&self, flag: Option<&str>, scenario: Scenario, env: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(display) = flag {
            return display.to_owned();
        }

        for var in ["DEMO_DISPLAY", "WAYLAND_DISPLAY"] {
            if let Some(value) = env(var).filter(|v| !v.is_empty()) {
                trace!(var, %value, "display from environment");
                return value;
            }
        }

        self.display
            .clone()
            .unwrap_or_else(|| scenario.default_display().to_owned())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::build(None).expect("failed to build default config")
    }
}

fn read_file(p: impl AsRef<Path>) -> anyhow::Result<parsed::Config> {
    let p = p.as_ref();
    let content = std::fs::read_to_string(p)?;

    let cfg = match p.extension().and_then(OsStr::to_str) {
        Some("json") => serde_json::from_str(&content)?,
        _ => toml::from_str(&content)?,
    };

    Ok(cfg)
}

fn locate_default_config_file() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

    for ext in &["toml", "json"] {
        let path = base.join("wevp").join("wevp").with_extension(ext);
        if path.exists() {
            return Some(path);
        }
    }

    None
}
