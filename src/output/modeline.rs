// SPDX-License-Identifier: GPL-3.0-or-later

//! Parsing of X11-style modelines.
//!
//! A modeline looks like
//! `148.5 1920 2008 2052 2200 1080 1084 1089 1125 +hsync +vsync`
//! with an optional trailing `interlace`.

use std::str::FromStr;

use smithay::output::Mode;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ModelineError {
    #[error("expected at least 11 fields, found {0}")]
    TooFewFields(usize),
    #[error("invalid {field}: `{value}`")]
    InvalidNumber { field: &'static str, value: String },
    #[error("invalid sync polarity `{0}`")]
    InvalidPolarity(String),
    #[error("htotal and vtotal must be non-zero")]
    ZeroTotal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolarity {
    Positive,
    Negative,
}

/// A user-defined display timing.
#[derive(Debug, Clone, PartialEq)]
pub struct Modeline {
    /// Pixel clock in kHz.
    pub clock: u32,
    pub hdisplay: u16,
    pub hsync_start: u16,
    pub hsync_end: u16,
    pub htotal: u16,
    pub vdisplay: u16,
    pub vsync_start: u16,
    pub vsync_end: u16,
    pub vtotal: u16,
    pub hsync: SyncPolarity,
    pub vsync: SyncPolarity,
    pub interlace: bool,
}

impl Modeline {
    /// Vertical refresh in millihertz.
    pub fn refresh(&self) -> i32 {
        let total = self.htotal as f64 * self.vtotal as f64;
        (self.clock as f64 * 1_000_000.0 / total) as i32
    }

    /// A name like `1920x1080@60`.
    pub fn name(&self) -> String {
        format!("{}x{}@{}", self.hdisplay, self.vdisplay, self.refresh() / 1000)
    }

    pub fn mode(&self) -> Mode {
        Mode {
            size: (self.hdisplay as i32, self.vdisplay as i32).into(),
            refresh: self.refresh(),
        }
    }
}

fn parse_polarity(token: &str, kind: &str) -> Result<SyncPolarity, ModelineError> {
    let token_lower = token.to_ascii_lowercase();
    if token_lower == format!("+{kind}") {
        Ok(SyncPolarity::Positive)
    } else if token_lower == format!("-{kind}") {
        Ok(SyncPolarity::Negative)
    } else {
        Err(ModelineError::InvalidPolarity(token.to_string()))
    }
}

impl FromStr for Modeline {
    type Err = ModelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = s.split_whitespace().collect::<Vec<_>>();
        if fields.len() < 11 {
            return Err(ModelineError::TooFewFields(fields.len()));
        }

        let clock_mhz = fields[0]
            .parse::<f32>()
            .map_err(|_| ModelineError::InvalidNumber {
                field: "clock",
                value: fields[0].to_string(),
            })?;

        const NAMES: [&str; 8] = [
            "hdisplay",
            "hsync_start",
            "hsync_end",
            "htotal",
            "vdisplay",
            "vsync_start",
            "vsync_end",
            "vtotal",
        ];
        let mut timings = [0u16; 8];
        for (i, timing) in timings.iter_mut().enumerate() {
            let value = fields[i + 1];
            *timing = value.parse().map_err(|_| ModelineError::InvalidNumber {
                field: NAMES[i],
                value: value.to_string(),
            })?;
        }

        let [hdisplay, hsync_start, hsync_end, htotal, vdisplay, vsync_start, vsync_end, vtotal] =
            timings;

        if htotal == 0 || vtotal == 0 {
            return Err(ModelineError::ZeroTotal);
        }

        let hsync = parse_polarity(fields[9], "hsync")?;
        let vsync = parse_polarity(fields[10], "vsync")?;
        let interlace = fields
            .get(11)
            .is_some_and(|token| token.eq_ignore_ascii_case("interlace"));

        Ok(Modeline {
            clock: (clock_mhz * 1000.0) as u32,
            hdisplay,
            hsync_start,
            hsync_end,
            htotal,
            vdisplay,
            vsync_start,
            vsync_end,
            vtotal,
            hsync,
            vsync,
            interlace,
        })
    }
}
