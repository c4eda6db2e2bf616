//! Round-robin rotation over per-backend introduction point lists.
//!
//! The per-backend lists are interleaved into one sequence that spreads the
//! backends evenly while preserving each backend's own ordering. A cursor
//! then hands out fixed-size windows of that sequence, wrapping around
//! indefinitely so every point is served equally often.

use crate::descriptor::IntroductionPoint;

/// Number of introduction points handed out per window.
pub const WINDOW_LEN: usize = 10;

/// Interleaves per-backend introduction point lists round-robin: for each
/// index, every backend that still has a point at that index contributes it.
pub fn interleave(backend_lists: &[Vec<IntroductionPoint>]) -> Vec<IntroductionPoint> {
    let max_len = backend_lists.iter().map(Vec::len).max().unwrap_or(0);

    let mut interleaved = Vec::with_capacity(backend_lists.iter().map(Vec::len).sum());
    for i in 0..max_len {
        for list in backend_lists {
            if let Some(point) = list.get(i) {
                interleaved.push(point.clone());
            }
        }
    }

    interleaved
}

/// A cyclic window cursor over the interleaved introduction point sequence.
#[derive(Debug, Clone)]
pub struct IntroPointRotation {
    introduction_points: Vec<IntroductionPoint>,
    current_pos: usize,
}

impl IntroPointRotation {
    pub fn new(backend_lists: &[Vec<IntroductionPoint>]) -> Self {
        Self {
            introduction_points: interleave(backend_lists),
            current_pos: 0,
        }
    }

    /// Total number of points in the rotation.
    pub fn len(&self) -> usize {
        self.introduction_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.introduction_points.is_empty()
    }

    /// Returns the next window of [`WINDOW_LEN`] consecutive points,
    /// wrapping around the sequence end. A sequence no longer than one
    /// window is returned whole.
    pub fn next_window(&mut self) -> Vec<IntroductionPoint> {
        let len = self.introduction_points.len();
        if len <= WINDOW_LEN {
            return self.introduction_points.clone();
        }

        let start = self.current_pos;
        self.current_pos += WINDOW_LEN;
        if self.current_pos <= len {
            return self.introduction_points[start..self.current_pos].to_vec();
        }

        let mut window = self.introduction_points[start..].to_vec();
        self.current_pos %= len;
        window.extend_from_slice(&self.introduction_points[..self.current_pos]);

        window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(identifier: &str) -> IntroductionPoint {
        IntroductionPoint {
            identifier: identifier.to_string(),
            ..IntroductionPoint::default()
        }
    }

    fn points(identifiers: &[&str]) -> Vec<IntroductionPoint> {
        identifiers.iter().map(|id| point(id)).collect()
    }

    fn identifiers(points: &[IntroductionPoint]) -> Vec<String> {
        points.iter().map(|p| p.identifier.clone()).collect()
    }

    fn backend_lists() -> Vec<Vec<IntroductionPoint>> {
        vec![
            points(&["a1", "a2", "a3", "a4", "a5", "a6", "a7", "a8"]),
            points(&["b1", "b2", "b3", "b4", "b5", "b6", "b7", "b8", "b9"]),
            points(&["c1", "c2", "c3", "c4", "c5", "c6", "c7", "c8"]),
        ]
    }

    #[test]
    fn interleaves_round_robin() {
        let got = interleave(&backend_lists());

        let want = [
            "a1", "b1", "c1", "a2", "b2", "c2", "a3", "b3", "c3", "a4", "b4", "c4", "a5", "b5",
            "c5", "a6", "b6", "c6", "a7", "b7", "c7", "a8", "b8", "c8", "b9",
        ];
        assert_eq!(identifiers(&got), want);
    }

    #[test]
    fn interleave_preserves_total_length() {
        let lists = backend_lists();
        let total: usize = lists.iter().map(Vec::len).sum();
        assert_eq!(interleave(&lists).len(), total);
    }

    #[test]
    fn windows_advance_and_wrap() {
        let lists = backend_lists();
        let want = interleave(&lists);
        let mut rotation = IntroPointRotation::new(&lists);

        assert_eq!(rotation.next_window(), want[0..10].to_vec());
        assert_eq!(rotation.next_window(), want[10..20].to_vec());

        let mut wrapped = want[20..].to_vec();
        wrapped.extend_from_slice(&want[..5]);
        assert_eq!(rotation.next_window(), wrapped);
    }

    #[test]
    fn windows_visit_every_point_equally() {
        let lists = backend_lists();
        let mut rotation = IntroPointRotation::new(&lists);
        let total = rotation.len();

        // two full laps of the sequence
        let calls = total.div_ceil(WINDOW_LEN) * 2;
        let mut counts = std::collections::HashMap::new();
        for _ in 0..calls {
            let window = rotation.next_window();
            assert_eq!(window.len(), WINDOW_LEN);
            for point in window {
                *counts.entry(point.identifier).or_insert(0u32) += 1;
            }
        }

        let min = counts.values().min().copied().unwrap_or(0);
        let max = counts.values().max().copied().unwrap_or(0);
        assert_eq!(counts.len(), total);
        assert!(max - min <= 1, "visit counts diverge: min {min}, max {max}");
    }

    #[test]
    fn short_sequence_is_returned_whole() {
        let lists = vec![points(&["a1", "a2"]), points(&["b1"])];
        let mut rotation = IntroPointRotation::new(&lists);

        assert_eq!(identifiers(&rotation.next_window()), ["a1", "b1", "a2"]);
        assert_eq!(identifiers(&rotation.next_window()), ["a1", "b1", "a2"]);
    }
}
