//! Advisory checks on candidate configurations.
//!
//! None of these reject a configuration. A layout that looks wrong is often an
//! intermediate step, for example right after a monitor was unplugged.

use smithay::utils::{Logical, Rectangle};

use crate::{output::OutputConfiguration, util::rect::RectExt};

/// The geometries of enabled outputs with a fixed position.
pub fn fixed_geometries(config: &OutputConfiguration) -> Vec<Rectangle<i32, Logical>> {
    config
        .values()
        .filter(|state| state.source.hosts_views())
        .filter_map(|state| state.fixed_geometry())
        .collect()
}

/// Whether any two rectangles share interior points.
pub fn any_overlapping(geometries: &[Rectangle<i32, Logical>]) -> bool {
    geometries.iter().enumerate().any(|(i, a)| {
        geometries[i + 1..]
            .iter()
            .any(|b| a.overlaps(*b))
    })
}

/// Whether the rectangles fail to form one connected region.
///
/// Two rectangles are connected when they overlap or share a border point.
/// An empty set is not disjoint.
pub fn is_disjoint(geometries: &[Rectangle<i32, Logical>]) -> bool {
    if geometries.is_empty() {
        return false;
    }

    let mut graph = vec![Vec::new(); geometries.len()];
    for i in 0..geometries.len() {
        for j in i + 1..geometries.len() {
            if geometries[i].touches(geometries[j]) {
                graph[i].push(j);
                graph[j].push(i);
            }
        }
    }

    let mut visited = vec![false; geometries.len()];
    let mut stack = vec![0];
    while let Some(node) = stack.pop() {
        if visited[node] {
            continue;
        }
        visited[node] = true;
        stack.extend(graph[node].iter().copied().filter(|next| !visited[*next]));
    }

    visited.contains(&false)
}

pub fn has_overlapping_outputs(config: &OutputConfiguration) -> bool {
    any_overlapping(&fixed_geometries(config))
}

/// Whether no output in the configuration hosts views.
pub fn all_outputs_disabled(config: &OutputConfiguration) -> bool {
    !config.values().any(|state| state.source.hosts_views())
}

pub fn has_disjoint_outputs(config: &OutputConfiguration) -> bool {
    is_disjoint(&fixed_geometries(config))
}
