use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, ValueHint};
use serde::Deserialize;
use tracing::warn;

use crate::{backend::headless::Connector, config::ModeSetting};

/// The main CLI struct.
#[derive(clap::Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Load `outputs.toml` from this directory
    #[arg(short, long, value_name("DIR"), value_hint(ValueHint::DirPath))]
    pub config_dir: Option<PathBuf>,

    /// Simulate the hardware described in this file
    ///
    /// Without this, a single 1920x1080 output named HEADLESS-1 is simulated.
    #[arg(long, value_name("FILE"), value_hint(ValueHint::FilePath))]
    pub hardware: Option<PathBuf>,

    /// Only check whether the config can be applied to the hardware
    #[arg(long)]
    pub check: bool,
}

impl Cli {
    /// Parses the command line, expanding `~` and variables in paths.
    pub fn parse_and_expand() -> Self {
        let mut cli = Cli::parse();

        cli.config_dir = cli.config_dir.and_then(|dir| {
            let new_dir = shellexpand::path::full(&dir);
            match new_dir {
                Ok(new_dir) => Some(new_dir.to_path_buf()),
                Err(err) => {
                    warn!("Could not shellexpand `--config-dir`'s argument: {err}; unsetting `--config-dir`");
                    None
                }
            }
        });

        cli
    }
}

/// A description of simulated hardware.
///
/// ```toml
/// [[connector]]
/// name = "DP-1"
/// modes = ["1920x1080@60", "2560x1440@144"]
/// preferred = "2560x1440@144"
/// drm = true
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hardware {
    #[serde(default, rename = "connector")]
    pub connectors: Vec<ConnectorDescription>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectorDescription {
    pub name: String,
    #[serde(default)]
    pub modes: Vec<String>,
    pub preferred: Option<String>,
    #[serde(default)]
    pub drm: bool,
    #[serde(default)]
    pub non_desktop: bool,
    /// The window size of a nested output, as `WxH`.
    pub nested: Option<String>,
}

impl Hardware {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read hardware description {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse hardware description {}", path.display()))
    }

    pub fn single_output() -> Self {
        Self {
            connectors: vec![ConnectorDescription {
                name: "HEADLESS-1".to_string(),
                modes: vec!["1920x1080@60".to_string()],
                preferred: None,
                drm: false,
                non_desktop: false,
                nested: None,
            }],
        }
    }

    pub fn connectors(&self) -> anyhow::Result<Vec<Connector>> {
        self.connectors
            .iter()
            .map(ConnectorDescription::to_connector)
            .collect()
    }
}

fn parse_mode(s: &str) -> anyhow::Result<(i32, i32, i32)> {
    let setting = s.parse::<ModeSetting>()?;
    let mode = setting
        .mode()
        .with_context(|| format!("`{s}` is not a resolution"))?;
    Ok((mode.size.w, mode.size.h, mode.refresh))
}

impl ConnectorDescription {
    fn to_connector(&self) -> anyhow::Result<Connector> {
        let mut connector = Connector::new(self.name.clone());
        let preferred = self.preferred.as_deref().map(parse_mode).transpose()?;

        for mode in self.modes.iter() {
            let (w, h, refresh) =
                parse_mode(mode).with_context(|| format!("invalid mode for {}", self.name))?;
            connector = if preferred == Some((w, h, refresh)) {
                connector.with_preferred_mode(w, h, refresh)
            } else {
                connector.with_mode(w, h, refresh)
            };
        }

        if let Some(size) = self.nested.as_deref() {
            let (w, h, _) = parse_mode(size)?;
            connector = connector.nested(w, h);
        }

        if self.drm {
            connector = connector.drm();
        }
        if self.non_desktop {
            connector = connector.non_desktop();
        }

        Ok(connector)
    }
}
