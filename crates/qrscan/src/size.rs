//! Output resolution negotiation

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn swapped(&self) -> Size {
        Size::new(self.height, self.width)
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Whether a sensor mount turns landscape buffers into portrait ones.
pub fn needs_swap(sensor_mount: u32) -> bool {
    sensor_mount % 180 != 0
}

/// Pick the smallest candidate that covers the target.
///
/// A lone candidate is returned as-is. When nothing covers the target the
/// first candidate wins, not the largest. Returns `None` only for an empty
/// list.
pub fn select(
    candidates: &[Size],
    target_width: u32,
    target_height: u32,
    swap_dimensions: bool,
) -> Option<Size> {
    let first = *candidates.first()?;
    if candidates.len() == 1 {
        debug!("selected camera size: {}", first);
        return Some(first);
    }

    let (ideal_width, ideal_height) = if swap_dimensions {
        (target_height, target_width)
    } else {
        (target_width, target_height)
    };
    debug!("ideal camera size: {} x {}", ideal_width, ideal_height);

    let chosen = candidates
        .iter()
        .filter(|s| s.width >= ideal_width && s.height >= ideal_height)
        .min_by_key(|s| s.area())
        .copied()
        .unwrap_or(first);
    debug!("selected camera size: {}", chosen);
    Some(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(list: &[(u32, u32)]) -> Vec<Size> {
        list.iter().map(|&(w, h)| Size::new(w, h)).collect()
    }

    #[test]
    fn empty_list_has_no_choice() {
        assert_eq!(select(&[], 640, 480, false), None);
    }

    #[test]
    fn single_candidate_is_returned_even_if_too_small() {
        let candidates = sizes(&[(320, 240)]);
        assert_eq!(select(&candidates, 1920, 1080, true), Some(Size::new(320, 240)));
    }

    #[test]
    fn picks_smallest_covering_size() {
        let candidates = sizes(&[(1920, 1080), (640, 480), (1280, 720), (800, 600)]);
        assert_eq!(select(&candidates, 700, 500, false), Some(Size::new(800, 600)));
    }

    #[test]
    fn swap_uses_transposed_target() {
        let candidates = sizes(&[(1920, 1080), (720, 1280), (1280, 720)]);
        // Portrait target 720x1280 against a 90-degree sensor wants 1280x720 buffers.
        assert_eq!(select(&candidates, 720, 1280, true), Some(Size::new(1280, 720)));
        assert_eq!(select(&candidates, 720, 1280, false), Some(Size::new(720, 1280)));
    }

    #[test]
    fn falls_back_to_first_not_largest() {
        let candidates = sizes(&[(640, 480), (1920, 1080), (1280, 720)]);
        assert_eq!(select(&candidates, 4000, 3000, false), Some(Size::new(640, 480)));
    }

    #[test]
    fn ties_keep_list_order() {
        let candidates = sizes(&[(1600, 900), (1200, 1200), (800, 600)]);
        assert_eq!(select(&candidates, 1000, 800, false), Some(Size::new(1600, 900)));
    }

    #[test]
    fn result_is_minimal_among_covering_candidates() {
        let candidates = sizes(&[
            (176, 144),
            (320, 240),
            (640, 480),
            (960, 720),
            (1280, 720),
            (1920, 1080),
        ]);
        for (w, h) in [(100, 100), (320, 240), (641, 480), (1000, 700), (1920, 1080)] {
            let chosen = select(&candidates, w, h, false).unwrap();
            let covering: Vec<_> = candidates
                .iter()
                .filter(|s| s.width >= w && s.height >= h)
                .collect();
            match covering.iter().map(|s| s.area()).min() {
                Some(min_area) => assert_eq!(chosen.area(), min_area),
                None => assert_eq!(chosen, candidates[0]),
            }
        }
    }

    #[test]
    fn swap_follows_sensor_mount() {
        assert!(!needs_swap(0));
        assert!(needs_swap(90));
        assert!(!needs_swap(180));
        assert!(needs_swap(270));
    }
}
