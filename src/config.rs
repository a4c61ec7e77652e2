pub mod mode;

use std::path::{Path, PathBuf};

use anyhow::Context;
use indexmap::IndexMap;
use smithay::utils::Transform;
use tracing::{error, info, warn};

use crate::output::{BitDepth, transform_from_name};

pub use mode::{ModeSetting, ParseError, PositionSetting};

pub const CONFIG_FILE_NAME: &str = "outputs.toml";

/// The persisted output configuration.
#[derive(serde::Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub workarounds: Workarounds,
    #[serde(rename = "output")]
    pub outputs: IndexMap<String, OutputSection>,
}

#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Workarounds {
    /// Prefer state set through output management clients over this file.
    pub use_external_output_configuration: bool,
}

impl Default for Workarounds {
    fn default() -> Self {
        Self {
            use_external_output_configuration: true,
        }
    }
}

/// The `[output.NAME]` section of one output.
#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct OutputSection {
    pub mode: String,
    pub position: String,
    pub scale: f64,
    pub transform: String,
    pub vrr: bool,
    pub depth: u32,
    /// Modelines to register with the output.
    pub custom_modes: Vec<String>,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            mode: "auto".to_string(),
            position: "auto".to_string(),
            scale: 1.0,
            transform: "normal".to_string(),
            vrr: false,
            depth: 8,
            custom_modes: Vec::new(),
        }
    }
}

impl OutputSection {
    /// The configured mode, or [`ModeSetting::Auto`] if it is invalid.
    pub fn mode(&self) -> ModeSetting {
        self.mode.parse().unwrap_or_else(|err| {
            error!("{err}, using auto");
            ModeSetting::Auto
        })
    }

    /// The configured position, or [`PositionSetting::Auto`] if it is invalid.
    pub fn position(&self) -> PositionSetting {
        self.position.parse().unwrap_or_else(|err| {
            error!("{err}, using auto");
            PositionSetting::Auto
        })
    }

    /// The configured transform, or [`Transform::Normal`] if it is invalid.
    pub fn transform(&self) -> Transform {
        transform_from_name(&self.transform).unwrap_or_else(|| {
            error!("Invalid transform \"{}\", using normal", self.transform);
            Transform::Normal
        })
    }

    /// The configured bit depth, or 8 if it is unsupported.
    pub fn depth(&self) -> BitDepth {
        BitDepth::try_from(self.depth).unwrap_or_else(|depth| {
            warn!("Unsupported bit depth {depth}, using 8");
            BitDepth::Eight
        })
    }

    /// The configured scale, or 1.0 if it is not positive.
    pub fn scale(&self) -> f64 {
        if self.scale.is_finite() && self.scale > 0.0 {
            self.scale
        } else {
            warn!("Invalid scale {}, using 1.0", self.scale);
            1.0
        }
    }
}

impl Config {
    /// Parses a config from TOML.
    pub fn from_toml(toml: &str) -> anyhow::Result<Self> {
        toml::from_str(toml).context("Failed to deserialize toml")
    }

    /// Loads the config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let toml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&toml).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Loads `outputs.toml` from `config_dir`.
    ///
    /// A missing file is not an error and yields the default config.
    pub fn load_from_dir(config_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = config_dir.as_ref().join(CONFIG_FILE_NAME);
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        info!("Loading config at {}", path.display());
        Self::load(path)
    }

    /// The section for the output `name`, or the default section if there is none.
    pub fn output_section(&self, name: &str) -> OutputSection {
        self.outputs.get(name).cloned().unwrap_or_default()
    }
}

/// Returns the config directory.
///
/// This is `$ORRERY_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/orrery`.
pub fn get_config_dir() -> Option<PathBuf> {
    let config_dir = std::env::var("ORRERY_CONFIG_DIR")
        .ok()
        .and_then(|s| Some(PathBuf::from(shellexpand::full(&s).ok()?.to_string())));

    config_dir.or_else(|| xdg::BaseDirectories::with_prefix("orrery").get_config_home())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_config_has_defaults() {
        let config = Config::from_toml("").unwrap();
        assert!(config.workarounds.use_external_output_configuration);
        assert!(config.outputs.is_empty());

        let section = config.output_section("DP-1");
        assert_eq!(section, OutputSection::default());
        assert_eq!(section.transform(), Transform::Normal);
        assert_eq!(section.depth(), BitDepth::Eight);
    }

    #[test]
    fn full_config_parses() {
        let config = Config::from_toml(
            r#"
            [workarounds]
            use_external_output_configuration = false

            [output.DP-1]
            mode = "2560x1440@144"
            position = "0,0"
            scale = 1.25
            transform = "90"
            vrr = true
            depth = 10
            custom_modes = ["148.5 1920 2008 2052 2200 1080 1084 1089 1125 +hsync +vsync"]

            [output.HDMI-A-1]
            mode = "mirror DP-1"
            "#,
        )
        .unwrap();

        assert!(!config.workarounds.use_external_output_configuration);

        let dp = config.output_section("DP-1");
        assert_eq!(
            dp.mode(),
            ModeSetting::Resolution {
                width: 2560,
                height: 1440,
                refresh: 144_000
            }
        );
        assert_eq!(dp.position(), PositionSetting::Fixed((0, 0).into()));
        assert_eq!(dp.scale(), 1.25);
        assert_eq!(dp.transform(), Transform::_90);
        assert!(dp.vrr);
        assert_eq!(dp.depth(), BitDepth::Ten);
        assert_eq!(dp.custom_modes.len(), 1);

        let hdmi = config.output_section("HDMI-A-1");
        assert_eq!(hdmi.mode(), ModeSetting::Mirror("DP-1".to_string()));
        assert_eq!(hdmi.position(), PositionSetting::Auto);

        assert_eq!(
            config.outputs.keys().collect::<Vec<_>>(),
            vec!["DP-1", "HDMI-A-1"]
        );
    }

    #[test]
    fn invalid_transform_and_depth_fall_back() {
        let config = Config::from_toml(
            r#"
            [output.DP-1]
            transform = "sideways"
            depth = 12
            scale = -2.0
            "#,
        )
        .unwrap();

        let section = config.output_section("DP-1");
        assert_eq!(section.transform(), Transform::Normal);
        assert_eq!(section.depth(), BitDepth::Eight);
        assert_eq!(section.scale(), 1.0);
    }

    #[test]
    fn invalid_settings_only_affect_their_field() {
        let config = Config::from_toml(
            r#"
            [output.DP-1]
            mode = "1920x1080@6O"
            position = "left"
            scale = 2.0

            [output.DP-2]
            mode = "off"
            "#,
        )
        .unwrap();

        let dp1 = config.output_section("DP-1");
        assert_eq!(dp1.mode(), ModeSetting::Auto);
        assert_eq!(dp1.position(), PositionSetting::Auto);
        assert_eq!(dp1.scale(), 2.0);
        assert_eq!(config.output_section("DP-2").mode(), ModeSetting::Off);
    }

    #[test]
    fn load_from_dir_reads_outputs_toml() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut file = std::fs::File::create(dir.path().join(CONFIG_FILE_NAME))?;
        writeln!(file, "[output.eDP-1]\nmode = \"off\"")?;

        let config = Config::load_from_dir(dir.path())?;
        assert_eq!(config.output_section("eDP-1").mode(), ModeSetting::Off);

        Ok(())
    }

    #[test]
    fn missing_file_yields_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        assert_eq!(Config::load_from_dir(dir.path())?, Config::default());
        Ok(())
    }

    #[test]
    fn unreadable_file_reports_path() {
        let err = Config::load("/nonexistent/orrery/outputs.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/orrery/outputs.toml"));
    }

    #[test]
    fn config_dir_from_env_is_expanded() {
        temp_env::with_vars(
            [
                ("ORRERY_CONFIG_DIR", Some("$ORRERY_TEST_HOME/cfg")),
                ("ORRERY_TEST_HOME", Some("/home/tester")),
            ],
            || {
                assert_eq!(get_config_dir(), Some(PathBuf::from("/home/tester/cfg")));
            },
        );
    }

    #[test]
    fn config_dir_falls_back_to_xdg() {
        temp_env::with_vars(
            [
                ("ORRERY_CONFIG_DIR", None),
                ("XDG_CONFIG_HOME", Some("/tmp/xdg-config")),
            ],
            || {
                assert_eq!(
                    get_config_dir(),
                    Some(PathBuf::from("/tmp/xdg-config/orrery"))
                );
            },
        );
    }
}
