use std::{fmt::Display, str::FromStr};

use smithay::{output::Mode, utils::Point};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid mode `{0}`, expected auto, off, WxH, WxH@Hz or mirror <output>")]
    Mode(String),
    #[error("invalid position `{0}`, expected auto or X,Y")]
    Position(String),
}

/// How an output section selects its mode.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ModeSetting {
    /// Pick the output's default mode.
    #[default]
    Auto,
    /// Disable the output.
    Off,
    /// Use the given resolution. A refresh of 0 prefers the preferred mode.
    Resolution { width: i32, height: i32, refresh: i32 },
    /// Mirror the named output.
    Mirror(String),
}

impl ModeSetting {
    /// The requested mode, for explicit resolutions.
    pub fn mode(&self) -> Option<Mode> {
        match self {
            ModeSetting::Resolution {
                width,
                height,
                refresh,
            } => Some(Mode {
                size: (*width, *height).into(),
                refresh: *refresh,
            }),
            _ => None,
        }
    }
}

impl FromStr for ModeSetting {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError::Mode(s.to_string());
        let trimmed = s.trim();

        match trimmed {
            "auto" | "default" => return Ok(ModeSetting::Auto),
            "off" => return Ok(ModeSetting::Off),
            _ => (),
        }

        if let Some(from) = trimmed.strip_prefix("mirror") {
            let from = from.trim();
            if from.is_empty() || !trimmed["mirror".len()..].starts_with(char::is_whitespace) {
                return Err(err());
            }
            return Ok(ModeSetting::Mirror(from.to_string()));
        }

        let (resolution, refresh) = match trimmed.split_once('@') {
            Some((resolution, refresh)) => (resolution, Some(refresh)),
            None => (trimmed, None),
        };

        let (width, height) = resolution.split_once('x').ok_or_else(err)?;
        let width = width.trim().parse::<i32>().map_err(|_| err())?;
        let height = height.trim().parse::<i32>().map_err(|_| err())?;
        if width <= 0 || height <= 0 {
            return Err(err());
        }

        let refresh = match refresh {
            Some(hz) => {
                let hz = hz.trim().parse::<f64>().map_err(|_| err())?;
                if !hz.is_finite() || hz < 0.0 {
                    return Err(err());
                }
                (hz * 1000.0).round() as i32
            }
            None => 0,
        };

        Ok(ModeSetting::Resolution {
            width,
            height,
            refresh,
        })
    }
}

impl Display for ModeSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModeSetting::Auto => write!(f, "auto"),
            ModeSetting::Off => write!(f, "off"),
            ModeSetting::Resolution {
                width,
                height,
                refresh: 0,
            } => write!(f, "{width}x{height}"),
            ModeSetting::Resolution {
                width,
                height,
                refresh,
            } => write!(f, "{width}x{height}@{:.3}", *refresh as f64 / 1000.0),
            ModeSetting::Mirror(from) => write!(f, "mirror {from}"),
        }
    }
}

/// Where an output section places its output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PositionSetting {
    #[default]
    Auto,
    Fixed(Point<i32, smithay::utils::Logical>),
}

impl FromStr for PositionSetting {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError::Position(s.to_string());
        let trimmed = s.trim();

        if trimmed == "auto" || trimmed == "default" {
            return Ok(PositionSetting::Auto);
        }

        let (x, y) = trimmed.split_once(',').ok_or_else(err)?;
        let x = x.trim().parse::<i32>().map_err(|_| err())?;
        let y = y.trim().parse::<i32>().map_err(|_| err())?;

        Ok(PositionSetting::Fixed((x, y).into()))
    }
}

impl Display for PositionSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSetting::Auto => write!(f, "auto"),
            PositionSetting::Fixed(loc) => write!(f, "{},{}", loc.x, loc.y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_modes() {
        assert_eq!("auto".parse(), Ok(ModeSetting::Auto));
        assert_eq!(" default ".parse(), Ok(ModeSetting::Auto));
        assert_eq!("off".parse(), Ok(ModeSetting::Off));
        assert_eq!(
            "mirror eDP-1".parse(),
            Ok(ModeSetting::Mirror("eDP-1".to_string()))
        );
    }

    #[test]
    fn resolution_modes() {
        assert_eq!(
            "1920x1080".parse(),
            Ok(ModeSetting::Resolution {
                width: 1920,
                height: 1080,
                refresh: 0
            })
        );
        assert_eq!(
            "2560x1440@143.912".parse(),
            Ok(ModeSetting::Resolution {
                width: 2560,
                height: 1440,
                refresh: 143_912
            })
        );
        assert_eq!(
            "1280x720@60".parse::<ModeSetting>().map(|mode| mode.mode()),
            Ok(Some(Mode {
                size: (1280, 720).into(),
                refresh: 60_000
            }))
        );
    }

    #[test]
    fn malformed_modes_are_rejected() {
        for bad in ["", "mirror", "mirrorDP-1", "1920", "1920x", "x1080", "0x0", "1920x1080@fast", "on"] {
            assert_eq!(
                bad.parse::<ModeSetting>(),
                Err(ParseError::Mode(bad.to_string())),
                "{bad}"
            );
        }
    }

    #[test]
    fn mode_display_is_parseable() {
        for mode in ["auto", "off", "1920x1080", "1920x1080@59.940", "mirror HDMI-A-1"] {
            let parsed = mode.parse::<ModeSetting>().unwrap();
            assert_eq!(parsed.to_string(), mode);
        }
    }

    #[test]
    fn positions() {
        assert_eq!("auto".parse(), Ok(PositionSetting::Auto));
        assert_eq!(
            "1920, -40".parse(),
            Ok(PositionSetting::Fixed((1920, -40).into()))
        );
        assert_eq!(
            "1920".parse::<PositionSetting>(),
            Err(ParseError::Position("1920".to_string()))
        );
        assert_eq!(PositionSetting::Fixed((5, 6).into()).to_string(), "5,6");
    }
}
