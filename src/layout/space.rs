//! The global coordinate space outputs are placed in.

use indexmap::IndexMap;
use smithay::utils::{Logical, Point, Rectangle, Size};

use crate::{
    output::OutputHandle,
    util::rect::{RectExt, distance_squared},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Fixed,
    Automatic,
}

#[derive(Debug, Clone, Copy)]
struct SpaceEntry {
    placement: Placement,
    loc: Point<i32, Logical>,
    size: Size<i32, Logical>,
}

impl SpaceEntry {
    fn geometry(&self) -> Rectangle<i32, Logical> {
        Rectangle::new(self.loc, self.size)
    }
}

/// Maps outputs to rectangles in the global space.
///
/// Automatically placed outputs are laid out left to right, starting at the right
/// edge of the rightmost fixed output, and are moved whenever the space changes.
#[derive(Debug, Default)]
pub struct OutputSpace {
    entries: IndexMap<OutputHandle, SpaceEntry>,
}

impl OutputSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `output` at `loc`. An output that is already placed is moved.
    pub fn add(&mut self, output: OutputHandle, loc: Point<i32, Logical>, size: Size<i32, Logical>) {
        let entry = self.entries.entry(output).or_insert(SpaceEntry {
            placement: Placement::Fixed,
            loc,
            size,
        });
        entry.placement = Placement::Fixed;
        entry.loc = loc;
        entry.size = size;

        self.reconfigure();
    }

    /// Places `output` automatically and returns where it ended up.
    pub fn add_auto(&mut self, output: OutputHandle, size: Size<i32, Logical>) -> Point<i32, Logical> {
        let entry = self.entries.entry(output).or_insert(SpaceEntry {
            placement: Placement::Automatic,
            loc: Point::default(),
            size,
        });
        entry.placement = Placement::Automatic;
        entry.size = size;

        self.reconfigure();
        self.entries
            .get(&output)
            .map(|entry| entry.loc)
            .unwrap_or_default()
    }

    /// Removes `output`, returning whether it was placed.
    pub fn remove(&mut self, output: OutputHandle) -> bool {
        let removed = self.entries.shift_remove(&output).is_some();
        if removed {
            self.reconfigure();
        }
        removed
    }

    /// Updates the size of a placed output.
    pub fn set_size(&mut self, output: OutputHandle, size: Size<i32, Logical>) {
        let Some(entry) = self.entries.get_mut(&output) else {
            return;
        };
        if entry.size != size {
            entry.size = size;
            self.reconfigure();
        }
    }

    pub fn contains(&self, output: OutputHandle) -> bool {
        self.entries.contains_key(&output)
    }

    pub fn is_automatic(&self, output: OutputHandle) -> bool {
        self.entries
            .get(&output)
            .is_some_and(|entry| entry.placement == Placement::Automatic)
    }

    pub fn geometry(&self, output: OutputHandle) -> Option<Rectangle<i32, Logical>> {
        self.entries.get(&output).map(SpaceEntry::geometry)
    }

    /// Placed outputs with their geometry, in insertion order.
    pub fn outputs(&self) -> impl Iterator<Item = (OutputHandle, Rectangle<i32, Logical>)> + '_ {
        self.entries
            .iter()
            .map(|(output, entry)| (*output, entry.geometry()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The output containing `point`.
    pub fn output_at(&self, point: Point<f64, Logical>) -> Option<OutputHandle> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.geometry().to_f64().contains(point))
            .map(|(output, _)| *output)
    }

    /// The point on any placed output closest to `point`.
    pub fn closest_point(&self, point: Point<f64, Logical>) -> Option<Point<f64, Logical>> {
        self.entries
            .values()
            .filter(|entry| entry.size.w > 0 && entry.size.h > 0)
            .map(|entry| entry.geometry().closest_point(point))
            .min_by(|a, b| distance_squared(point, *a).total_cmp(&distance_squared(point, *b)))
    }

    fn reconfigure(&mut self) {
        let mut next_x = i32::MIN;
        let mut next_y = 0;

        for entry in self
            .entries
            .values()
            .filter(|entry| entry.placement == Placement::Fixed)
        {
            let geo = entry.geometry();
            if geo.right() > next_x {
                next_x = geo.right();
                next_y = geo.top();
            }
        }

        if next_x == i32::MIN {
            next_x = 0;
            next_y = 0;
        }

        for entry in self
            .entries
            .values_mut()
            .filter(|entry| entry.placement == Placement::Automatic)
        {
            entry.loc = Point::from((next_x, next_y));
            next_x += entry.size.w;
        }
    }
}
