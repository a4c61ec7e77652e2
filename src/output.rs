// SPDX-License-Identifier: GPL-3.0-or-later

pub mod controller;
pub mod mirror;
pub mod modeline;
pub mod setter;

use std::{
    cell::RefCell,
    sync::atomic::{AtomicU32, Ordering},
};

use bitflags::bitflags;
use indexmap::IndexMap;
use smithay::{
    output::{Mode, Output},
    utils::{Logical, Physical, Point, Rectangle, Size, Transform},
};

static HANDLE_COUNTER: AtomicU32 = AtomicU32::new(1);

/// An opaque reference to one hardware output owned by a backend.
///
/// Handles are unique for the lifetime of the process, even across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputHandle(u32);

impl OutputHandle {
    /// Allocates a new, never before seen handle.
    pub fn next() -> Self {
        Self(HANDLE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for OutputHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where an output's image comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ImageSource {
    /// The output is disabled.
    #[default]
    Off,
    /// The output renders its own content.
    Direct,
    /// The output copies the image of the named output.
    Mirror(String),
    /// The output is powered down but keeps its compositor-side state.
    Dpms,
}

impl ImageSource {
    /// Whether the output has a compositor-facing output object that hosts views.
    ///
    /// This is true for directly driven outputs and for powered-down ones.
    pub fn hosts_views(&self) -> bool {
        matches!(self, ImageSource::Direct | ImageSource::Dpms)
    }

    /// Whether the hardware is scanning out an image.
    pub fn drives_hardware(&self) -> bool {
        matches!(self, ImageSource::Direct | ImageSource::Mirror(_))
    }

    pub fn is_off(&self) -> bool {
        matches!(self, ImageSource::Off)
    }

    pub fn is_mirror(&self) -> bool {
        matches!(self, ImageSource::Mirror(_))
    }

    /// The name of the mirrored output, if mirroring.
    pub fn mirror_from(&self) -> Option<&str> {
        match self {
            ImageSource::Mirror(from) => Some(from),
            _ => None,
        }
    }
}

/// The position of an output in the spatial layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputPosition {
    /// The position is picked when the output is added to the layout.
    #[default]
    Automatic,
    Fixed(Point<i32, Logical>),
}

impl OutputPosition {
    pub fn is_automatic(&self) -> bool {
        matches!(self, OutputPosition::Automatic)
    }
}

/// A supported render bit depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BitDepth {
    #[default]
    Eight,
    Ten,
}

impl BitDepth {
    pub fn bits(self) -> u32 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Ten => 10,
        }
    }
}

impl TryFrom<u32> for BitDepth {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            8 => Ok(BitDepth::Eight),
            10 => Ok(BitDepth::Ten),
            other => Err(other),
        }
    }
}

bitflags! {
    /// The fields of an [`OutputState`] that changed in a transition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChangedFields: u32 {
        const SOURCE = 1;
        const MODE = 1 << 1;
        const SCALE = 1 << 2;
        const TRANSFORM = 1 << 3;
        const POSITION = 1 << 4;
    }
}

/// The desired configuration of one output.
#[derive(Debug, Clone)]
pub struct OutputState {
    pub source: ImageSource,
    pub mode: Mode,
    /// Whether `mode` was requested as a custom mode and must not be
    /// replaced by the closest advertised one.
    pub uses_custom_mode: bool,
    pub position: OutputPosition,
    pub scale: f64,
    pub transform: Transform,
    pub vrr: bool,
    pub depth: BitDepth,
}

impl Default for OutputState {
    fn default() -> Self {
        Self {
            source: ImageSource::Off,
            mode: Mode {
                size: (0, 0).into(),
                refresh: 0,
            },
            uses_custom_mode: false,
            position: OutputPosition::Automatic,
            scale: 1.0,
            transform: Transform::Normal,
            vrr: false,
            depth: BitDepth::Eight,
        }
    }
}

impl OutputState {
    /// A state that disables the output.
    pub fn off() -> Self {
        Self::default()
    }

    /// Returns the fields which differ between `self` and `new`.
    pub fn changed_fields(&self, new: &OutputState) -> ChangedFields {
        let mut changed = ChangedFields::empty();

        if self.source != new.source {
            changed |= ChangedFields::SOURCE;
        }
        if self.mode != new.mode {
            changed |= ChangedFields::MODE;
        }
        if self.scale != new.scale {
            changed |= ChangedFields::SCALE;
        }
        if self.transform != new.transform {
            changed |= ChangedFields::TRANSFORM;
        }
        if self.position != new.position {
            changed |= ChangedFields::POSITION;
        }

        changed
    }

    /// The logical size of the output when configured with this state.
    pub fn logical_size(&self) -> Size<i32, Logical> {
        logical_size(self.mode.size, self.transform, self.scale)
    }

    /// The logical rectangle of a fixed-position output, if it has a fixed position.
    pub fn fixed_geometry(&self) -> Option<Rectangle<i32, Logical>> {
        match self.position {
            OutputPosition::Automatic => None,
            OutputPosition::Fixed(loc) => Some(Rectangle::new(loc, self.logical_size())),
        }
    }
}

impl PartialEq for OutputState {
    fn eq(&self, other: &Self) -> bool {
        match &self.source {
            ImageSource::Off => other.source.is_off(),
            ImageSource::Mirror(from) => other.source.mirror_from() == Some(from),
            source => {
                *source == other.source
                    && self.position == other.position
                    && self.mode == other.mode
                    && self.transform == other.transform
                    && self.scale == other.scale
                    && self.vrr == other.vrr
                    && self.depth == other.depth
            }
        }
    }
}

/// A full desired configuration: one state per tracked output.
pub type OutputConfiguration = IndexMap<OutputHandle, OutputState>;

/// Computes the logical size of a mode with the given transform and scale.
///
/// Odd (90 and 270 degree) transforms swap width and height.
pub fn logical_size(size: Size<i32, Physical>, transform: Transform, scale: f64) -> Size<i32, Logical> {
    let scale = if scale > 0.0 { scale } else { 1.0 };
    let size = transform.transform_size(size);
    Size::from(((size.w as f64 / scale) as i32, (size.h as f64 / scale) as i32))
}

/// Converts a transform name from the config file.
pub fn transform_from_name(name: &str) -> Option<Transform> {
    let transform = match name {
        "normal" => Transform::Normal,
        "90" => Transform::_90,
        "180" => Transform::_180,
        "270" => Transform::_270,
        "flipped" => Transform::Flipped,
        "90_flipped" => Transform::Flipped90,
        "180_flipped" => Transform::Flipped180,
        "270_flipped" => Transform::Flipped270,
        _ => return None,
    };
    Some(transform)
}

pub fn transform_name(transform: Transform) -> &'static str {
    match transform {
        Transform::Normal => "normal",
        Transform::_90 => "90",
        Transform::_180 => "180",
        Transform::_270 => "270",
        Transform::Flipped => "flipped",
        Transform::Flipped90 => "90_flipped",
        Transform::Flipped180 => "180_flipped",
        Transform::Flipped270 => "270_flipped",
    }
}

/// Render-side state attached to a compositor [`Output`].
#[derive(Debug, Default)]
pub struct RenderState {
    /// Rendering is suspended, e.g. while the output is powered down.
    pub inhibited: bool,
    /// The whole output must be redrawn on the next frame.
    pub needs_full_redraw: bool,
}

pub trait WithState {
    type State: Default;

    fn with_state<F, T>(&self, func: F) -> T
    where
        F: FnOnce(&Self::State) -> T;

    fn with_state_mut<F, T>(&self, func: F) -> T
    where
        F: FnOnce(&mut Self::State) -> T;
}

impl WithState for Output {
    type State = RenderState;

    fn with_state<F, T>(&self, func: F) -> T
    where
        F: FnOnce(&Self::State) -> T,
    {
        let state = self
            .user_data()
            .get_or_insert(RefCell::<Self::State>::default);

        func(&state.borrow())
    }

    fn with_state_mut<F, T>(&self, func: F) -> T
    where
        F: FnOnce(&mut Self::State) -> T,
    {
        let state = self
            .user_data()
            .get_or_insert(RefCell::<Self::State>::default);

        func(&mut state.borrow_mut())
    }
}

/// The logical size of a compositor output in its current state.
pub fn output_logical_size(output: &Output) -> Option<Size<i32, Logical>> {
    let mode = output.current_mode()?;
    Some(logical_size(
        mode.size,
        output.current_transform(),
        output.current_scale().fractional_scale(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(w: i32, h: i32, refresh: i32) -> Mode {
        Mode {
            size: (w, h).into(),
            refresh,
        }
    }

    #[test]
    fn disabled_states_compare_by_source_only() {
        let off = OutputState::off();
        let other_off = OutputState {
            mode: mode(1920, 1080, 60_000),
            scale: 2.0,
            ..OutputState::off()
        };
        assert_eq!(off, other_off);

        let on = OutputState {
            source: ImageSource::Direct,
            ..OutputState::off()
        };
        assert_ne!(off, on);
    }

    #[test]
    fn mirror_states_compare_by_mirror_target() {
        let a = OutputState {
            source: ImageSource::Mirror("DP-1".into()),
            mode: mode(1920, 1080, 60_000),
            ..Default::default()
        };
        let b = OutputState {
            source: ImageSource::Mirror("DP-1".into()),
            mode: mode(1280, 720, 60_000),
            scale: 3.0,
            ..Default::default()
        };
        let c = OutputState {
            source: ImageSource::Mirror("HDMI-A-1".into()),
            ..b.clone()
        };

        assert_eq!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn direct_states_compare_every_field() {
        let a = OutputState {
            source: ImageSource::Direct,
            mode: mode(1920, 1080, 60_000),
            ..Default::default()
        };
        assert_eq!(a, a.clone());
        assert_ne!(a, OutputState { vrr: true, ..a.clone() });
        assert_ne!(a, OutputState { depth: BitDepth::Ten, ..a.clone() });
        assert_ne!(
            a,
            OutputState {
                position: OutputPosition::Fixed((10, 0).into()),
                ..a.clone()
            }
        );
        assert_ne!(
            a,
            OutputState {
                source: ImageSource::Dpms,
                ..a.clone()
            }
        );
    }

    #[test]
    fn changed_fields_are_tracked_individually() {
        let a = OutputState {
            source: ImageSource::Direct,
            mode: mode(1920, 1080, 60_000),
            ..Default::default()
        };
        let b = OutputState {
            scale: 2.0,
            transform: Transform::_90,
            ..a.clone()
        };

        assert_eq!(
            a.changed_fields(&b),
            ChangedFields::SCALE | ChangedFields::TRANSFORM
        );
        assert_eq!(a.changed_fields(&a), ChangedFields::empty());
        assert_eq!(
            OutputState::off().changed_fields(&a),
            ChangedFields::SOURCE | ChangedFields::MODE
        );
    }

    #[test]
    fn logical_size_swaps_on_odd_transforms() {
        let size = Size::from((1920, 1080));
        assert_eq!(logical_size(size, Transform::Normal, 1.0), Size::from((1920, 1080)));
        assert_eq!(logical_size(size, Transform::_90, 1.0), Size::from((1080, 1920)));
        assert_eq!(logical_size(size, Transform::Flipped270, 2.0), Size::from((540, 960)));
        assert_eq!(logical_size(size, Transform::Flipped180, 1.5), Size::from((1280, 720)));
    }

    #[test]
    fn transform_names_round_trip() {
        for name in [
            "normal",
            "90",
            "180",
            "270",
            "flipped",
            "90_flipped",
            "180_flipped",
            "270_flipped",
        ] {
            let transform = transform_from_name(name).unwrap();
            assert_eq!(transform_name(transform), name);
        }
        assert_eq!(transform_from_name("sideways"), None);
    }
}
