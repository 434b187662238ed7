//! Line-crossing counter.
//!
//! Each identity moves `Unseen -> Tracked -> Counted` and never back. A
//! confirmed track is counted the first time its reference point lies
//! strictly inside the band around the counting line.

use std::collections::BTreeSet;

use tracing::info;

use crate::sort::{BBox, Ltrb};
use crate::tracking::{Track, TrackId};

/// Horizontal counting line with a half-band tolerance, in pixels.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CountingLine {
    pub y: i32,
    pub tolerance: i32,
}

impl CountingLine {
    pub fn new(y: i32, tolerance: i32) -> Self {
        Self { y, tolerance }
    }

    /// True when `cy` lies in the open interval `(y - tolerance, y + tolerance)`.
    #[inline]
    pub fn contains(&self, cy: i64) -> bool {
        let y = self.y as i64;
        let tolerance = self.tolerance as i64;

        y - tolerance < cy && cy < y + tolerance
    }
}

/// Vertical midpoint of a box, on pixel-truncated corners.
#[inline]
pub fn reference_point(bbox: &BBox<Ltrb>) -> i64 {
    let y1 = bbox.top() as i64;
    let y2 = bbox.bottom() as i64;

    (y1 + y2) / 2
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrackPhase {
    Unseen,
    Tracked,
    Counted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountState {
    pub counted_ids: BTreeSet<TrackId>,
    pub total: u64,
}

#[derive(Debug, Clone)]
pub struct CountingEngine {
    line: CountingLine,
    seen: BTreeSet<TrackId>,
    state: CountState,
}

impl CountingEngine {
    pub fn new(line: CountingLine) -> Self {
        Self {
            line,
            seen: BTreeSet::new(),
            state: CountState::default(),
        }
    }

    #[inline]
    pub fn line(&self) -> CountingLine {
        self.line
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.state.total
    }

    #[inline]
    pub fn state(&self) -> &CountState {
        &self.state
    }

    pub fn into_state(self) -> CountState {
        self.state
    }

    pub fn phase(&self, id: TrackId) -> TrackPhase {
        if self.state.counted_ids.contains(&id) {
            TrackPhase::Counted
        } else if self.seen.contains(&id) {
            TrackPhase::Tracked
        } else {
            TrackPhase::Unseen
        }
    }

    /// Applies one frame of tracks. Returns the identities counted on this
    /// frame, in ascending order.
    pub fn update(&mut self, tracks: &[Track]) -> Vec<TrackId> {
        let mut newly_counted = Vec::new();

        for track in tracks.iter().filter(|t| t.confirmed) {
            self.seen.insert(track.id);

            if self.state.counted_ids.contains(&track.id) {
                continue;
            }

            if self.line.contains(reference_point(&track.bbox)) {
                self.state.counted_ids.insert(track.id);
                self.state.total += 1;
                newly_counted.push(track.id);

                info!(
                    id = %track.id,
                    total = self.state.total,
                    "Vehicle {} counted! Total: {}",
                    track.id,
                    self.state.total
                );
            }
        }

        newly_counted.sort();
        newly_counted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: u64, cy: f32, confirmed: bool) -> Track {
        Track::new(id, BBox::ltrb(10.0, cy - 20.0, 50.0, cy + 20.0), confirmed)
    }

    #[test]
    fn band_is_open_interval() {
        let line = CountingLine::new(100, 10);

        assert!(!line.contains(90));
        assert!(line.contains(91));
        assert!(line.contains(109));
        assert!(!line.contains(110));
        assert!(!CountingLine::new(100, 0).contains(100));
    }

    #[test]
    fn reference_point_truncates() {
        assert_eq!(reference_point(&BBox::ltrb(0.0, 10.9, 5.0, 21.9)), 15);
        assert_eq!(reference_point(&BBox::ltrb(0.0, 10.0, 5.0, 21.0)), 15);
    }

    #[test]
    fn counts_once_on_entering_frame() {
        let mut engine = CountingEngine::new(CountingLine::new(300, 10));

        assert!(engine.update(&[track(1, 285.0, true)]).is_empty());
        assert_eq!(engine.phase(TrackId(1)), TrackPhase::Tracked);

        assert_eq!(engine.update(&[track(1, 300.0, true)]), vec![TrackId(1)]);
        assert!(engine.update(&[track(1, 315.0, true)]).is_empty());

        assert_eq!(engine.total(), 1);
        assert_eq!(engine.phase(TrackId(1)), TrackPhase::Counted);
    }

    #[test]
    fn oscillation_does_not_recount() {
        let mut engine = CountingEngine::new(CountingLine::new(300, 10));

        for cy in [295.0, 320.0, 301.0, 280.0, 305.0] {
            engine.update(&[track(4, cy, true)]);
        }

        assert_eq!(engine.total(), 1);
        assert_eq!(engine.state().counted_ids.len(), 1);
    }

    #[test]
    fn unconfirmed_tracks_are_ignored() {
        let mut engine = CountingEngine::new(CountingLine::new(300, 10));

        engine.update(&[track(2, 300.0, false)]);
        assert_eq!(engine.total(), 0);
        assert_eq!(engine.phase(TrackId(2)), TrackPhase::Unseen);
    }

    #[test]
    fn order_within_frame_is_irrelevant() {
        let tracks = vec![track(1, 300.0, true), track(2, 302.0, true), track(3, 150.0, true)];
        let mut reversed = tracks.clone();
        reversed.reverse();

        let mut a = CountingEngine::new(CountingLine::new(300, 10));
        let mut b = CountingEngine::new(CountingLine::new(300, 10));

        assert_eq!(a.update(&tracks), b.update(&reversed));
        assert_eq!(a.into_state(), b.into_state());
    }

    #[test]
    fn reacquired_object_counts_again_under_new_id() {
        let mut engine = CountingEngine::new(CountingLine::new(300, 10));

        engine.update(&[track(1, 300.0, true)]);
        engine.update(&[track(9, 300.0, true)]);

        assert_eq!(engine.total(), 2);
        assert_eq!(engine.state().total as usize, engine.state().counted_ids.len());
    }
}
