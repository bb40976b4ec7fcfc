//! Pure scaling-decision logic (§4.1).
//!
//! No I/O, no clock, no database: given a resource's configuration and an
//! asset's current observed status, compute which resize reasons are
//! currently justified and what size each would propose. Everything here
//! is a plain function over owned inputs, unlike the rest of the crate
//! which threads a `PgExecutor` through almost everything — this module has
//! no direct teacher analogue (the teacher has no pure domain-logic layer
//! of this shape) and is written straight from the spec, tested the way
//! `kernel/jobs/job.rs` tests its pure helpers inline.

use std::collections::BTreeMap;

use crate::model::asset::Asset;
use crate::model::reason::Reason;
use crate::model::resource::Resource;

/// Computes the set of reasons currently justified for `asset` under
/// `resource`'s configuration, each mapped to its proposed new size.
///
/// Returned in `Reason`'s priority order (`critical`, then `high`, then
/// `low`) since callers that only want one pick the first entry.
pub fn eligible_operations(resource: &Resource, asset: &Asset) -> BTreeMap<Reason, i64> {
    let mut eligible = BTreeMap::new();

    for (reason, threshold_percent, delay_direction) in [
        (Reason::Critical, &resource.critical_threshold_percent, Direction::Up),
        (Reason::High, &resource.high_threshold_percent, Direction::Up),
        (Reason::Low, &resource.low_threshold_percent, Direction::Down),
    ] {
        if !crosses_any_metric(asset, threshold_percent, delay_direction) {
            continue;
        }

        let Some(threshold) = dominant_threshold(asset, threshold_percent, delay_direction) else {
            continue;
        };

        let proposed = propose_size(resource, asset, asset.size, threshold, delay_direction);
        let clamped = clamp(resource, asset, proposed);

        if clamped != asset.size {
            eligible.insert(reason, clamped);
        }
    }

    eligible
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// `high`/`critical`: usage% >= threshold triggers an upsize.
    Up,
    /// `low`: usage% <= threshold triggers a downsize.
    Down,
}

fn crosses_any_metric(
    asset: &Asset,
    threshold_percent: &crate::common::MetricMap,
    direction: Direction,
) -> bool {
    threshold_percent.iter().any(|(metric, threshold)| {
        // A threshold of zero means the direction is disabled for that metric.
        if *threshold == 0.0 {
            return false;
        }
        let usage_percent = asset.usage.get(metric).copied().unwrap_or(0.0) * 100.0;
        match direction {
            Direction::Up => usage_percent >= *threshold,
            Direction::Down => usage_percent <= *threshold,
        }
    })
}

/// The threshold value driving the proposal: for `Up`, the lowest crossed
/// threshold (the tightest bound already crossed); for `Down`, the highest.
fn dominant_threshold(
    asset: &Asset,
    threshold_percent: &crate::common::MetricMap,
    direction: Direction,
) -> Option<f64> {
    threshold_percent
        .iter()
        .filter(|(_, threshold)| **threshold > 0.0)
        .filter(|(metric, threshold)| {
            let usage_percent = asset.usage.get(*metric).copied().unwrap_or(0.0) * 100.0;
            match direction {
                Direction::Up => usage_percent >= **threshold,
                Direction::Down => usage_percent <= **threshold,
            }
        })
        .map(|(_, threshold)| *threshold)
        .fold(None, |acc, threshold| match (acc, direction) {
            (None, _) => Some(threshold),
            (Some(current), Direction::Up) => Some(current.min(threshold)),
            (Some(current), Direction::Down) => Some(current.max(threshold)),
        })
}

fn propose_size(
    resource: &Resource,
    asset: &Asset,
    old_size: i64,
    threshold: f64,
    direction: Direction,
) -> i64 {
    if resource.single_step {
        // Just outside the crossed threshold given current usage, so a
        // further trigger requires usage itself to change again.
        let usage_fraction = dominant_usage_fraction(asset, threshold, direction);
        let usage_absolute = usage_fraction * old_size as f64;
        match direction {
            Direction::Up => (usage_absolute * 100.0 / threshold).floor() as i64 + 1,
            Direction::Down => ((usage_absolute * 100.0 / threshold).ceil() as i64 - 1).max(0),
        }
    } else {
        let step = resource.size_step_percent / 100.0;
        match direction {
            Direction::Up => (old_size as f64 * (1.0 + step)).ceil() as i64,
            Direction::Down => (old_size as f64 * (1.0 - step)).floor() as i64,
        }
    }
}

/// The usage fraction of whichever metric drove `dominant_threshold`.
/// Approximated by taking the metric whose usage percent is closest to
/// `threshold` in the proposal's direction, mirroring the selection above.
fn dominant_usage_fraction(asset: &Asset, threshold: f64, direction: Direction) -> f64 {
    asset
        .usage
        .values()
        .copied()
        .filter(|usage| {
            let usage_percent = usage * 100.0;
            match direction {
                Direction::Up => usage_percent >= threshold,
                Direction::Down => usage_percent <= threshold,
            }
        })
        .fold(None, |acc: Option<f64>, usage| match acc {
            None => Some(usage),
            Some(current) => match direction {
                Direction::Up => Some(current.min(usage)),
                Direction::Down => Some(current.max(usage)),
            },
        })
        .unwrap_or(0.0)
}

fn clamp(resource: &Resource, asset: &Asset, proposed: i64) -> i64 {
    let (min_size, max_size) = resource.size_bounds();

    let mut lower = min_size;
    let mut upper = max_size;

    if let Some(strict_min) = asset.strict_minimum_size {
        lower = Some(lower.map_or(strict_min, |bound| bound.max(strict_min)));
    }
    if let Some(strict_max) = asset.strict_maximum_size {
        upper = Some(upper.map_or(strict_max, |bound| bound.min(strict_max)));
    }

    if let Some(min_free_size) = resource.min_free_size {
        let usage_absolute: f64 = asset.usage.values().copied().fold(0.0, f64::max) * asset.size as f64;
        let floor_for_free_space = (usage_absolute + min_free_size as f64).ceil() as i64;
        lower = Some(lower.map_or(floor_for_free_space, |bound| bound.max(floor_for_free_space)));
    }

    let mut size = proposed;
    if let Some(lower) = lower {
        size = size.max(lower);
    }
    if let Some(upper) = upper {
        size = size.min(upper);
    }
    size
}
