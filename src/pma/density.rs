// Copyright (c) 2024-present, brt-core developers
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Density thresholds and window geometry for [`super::Gpma`].
//!
//! A window near the leaves of the conceptual "window-doubling" tree
//! over the array may run almost full before it needs rebalancing;
//! the window spanning the whole array has to stay much sparser, since
//! a rebalance there means a full-array resize. Thresholds interpolate
//! linearly between those two extremes by the window's level
//! (`log2(window_size)` out of `log2(capacity)`).

const UPPER_LEAF: f64 = 1.0;
const UPPER_ROOT: f64 = 0.50;
const LOWER_LEAF: f64 = 0.25;
const LOWER_ROOT: f64 = 0.40;

fn level_fraction(window_size: usize, capacity: usize) -> f64 {
    if capacity <= 1 {
        return 1.0;
    }
    let max_level = capacity.trailing_zeros().max(1) as f64;
    let level = window_size.max(1).trailing_zeros() as f64;
    (level / max_level).clamp(0.0, 1.0)
}

/// Maximum occupied fraction a window of this size may reach before
/// it must be rebalanced.
#[must_use]
pub fn window_upper_bound(window_size: usize, capacity: usize) -> f64 {
    let t = level_fraction(window_size, capacity);
    UPPER_LEAF + (UPPER_ROOT - UPPER_LEAF) * t
}

/// Minimum occupied fraction a window of this size may fall to before
/// a delete must trigger a rebalance (and, for the whole array, a
/// shrink).
#[must_use]
pub fn window_lower_bound(window_size: usize, capacity: usize) -> f64 {
    let t = level_fraction(window_size, capacity);
    LOWER_LEAF + (LOWER_ROOT - LOWER_LEAF) * t
}

fn center_window(anchor: usize, size: usize, capacity: usize) -> (usize, usize) {
    let size = size.min(capacity);
    let half = size / 2;
    let start = anchor.saturating_sub(half).min(capacity - size);
    (start, start + size)
}

/// The smallest window (size two, or the whole array if smaller)
/// centered on a physical index.
pub(super) fn smallest_window(anchor: usize, capacity: usize) -> (usize, usize) {
    center_window(anchor, 2.min(capacity), capacity)
}

/// Doubles a window's size, re-centering it on its prior midpoint and
/// clamping to the array's bounds. Once the window covers the whole
/// array, widening it further is a no-op.
pub(super) fn widen_window(window: (usize, usize), capacity: usize) -> (usize, usize) {
    let (start, end) = window;
    if end - start >= capacity {
        return (0, capacity);
    }
    let size = ((end - start) * 2).min(capacity);
    let anchor = start.midpoint(end);
    center_window(anchor, size, capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_windows_tolerate_higher_density_than_root() {
        let capacity = 1024;
        assert!(window_upper_bound(2, capacity) > window_upper_bound(capacity, capacity));
        assert!(window_lower_bound(2, capacity) < window_lower_bound(capacity, capacity));
    }

    #[test]
    fn widening_eventually_covers_the_whole_array() {
        let capacity = 64;
        let mut window = smallest_window(17, capacity);
        for _ in 0..10 {
            window = widen_window(window, capacity);
        }
        assert_eq!((0, capacity), window);
    }
}
