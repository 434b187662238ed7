//! Tracker adapter: marshals vehicle detections into the DeepSORT backend and
//! exposes its tracks as `Track { id, bbox, confirmed }`.

use std::fmt;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TrackerConfig;
use crate::detection::Detection;
use crate::error::{Error, Result};
use crate::pipeline::Frame;
use crate::sort::{self, BBox, Ltrb, NearestNeighborDistanceMetric, NearestNeighborMetricKind};

/// Stable identity assigned by the tracker. Never reused within a run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub bbox: BBox<Ltrb>,
    pub confirmed: bool,
}

impl Track {
    pub fn new(id: u64, bbox: BBox<Ltrb>, confirmed: bool) -> Self {
        Self {
            id: TrackId(id),
            bbox,
            confirmed,
        }
    }
}

pub trait Tracker<P> {
    /// Feeds one frame of detections, returns every live track.
    fn update(&mut self, detections: &[Detection], frame: &Frame<P>) -> Result<Vec<Track>>;
}

impl<P, T: Tracker<P> + ?Sized> Tracker<P> for Box<T> {
    fn update(&mut self, detections: &[Detection], frame: &Frame<P>) -> Result<Vec<Track>> {
        (**self).update(detections, frame)
    }
}

/// Appearance feature extractor.
///
/// Returns one feature row per detection, or an empty vector when it has
/// nothing to offer for this frame.
pub trait Embedder<P> {
    fn embed(&mut self, image: &P, detections: &[Detection]) -> Result<Vec<Array1<f32>>>;
}

/// Embedder that never produces features, leaving association to IoU.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEmbedder;

impl<P> Embedder<P> for NoEmbedder {
    fn embed(&mut self, _: &P, _: &[Detection]) -> Result<Vec<Array1<f32>>> {
        Ok(Vec::new())
    }
}

/// DeepSORT tracker with an optional appearance embedder.
pub struct DeepSort<E> {
    tracker: sort::Tracker<NearestNeighborDistanceMetric>,
    embedder: E,
}

impl DeepSort<NoEmbedder> {
    pub fn without_appearance(config: &TrackerConfig) -> Self {
        Self::new(config, NoEmbedder)
    }
}

impl<E> DeepSort<E> {
    pub fn new(config: &TrackerConfig, embedder: E) -> Self {
        let metric = NearestNeighborDistanceMetric::new(
            NearestNeighborMetricKind::CosineDistance,
            config.max_cosine_distance,
            config.nn_budget,
        );

        Self {
            tracker: sort::Tracker::new(metric, config.max_iou_distance, config.max_age, config.n_init),
            embedder,
        }
    }

    fn tracks(&self) -> Vec<Track> {
        let mut tracks: Vec<_> = self
            .tracker
            .tracks()
            .iter()
            .map(|t| Track::new(t.track_id, t.bbox().as_ltrb(), t.is_confirmed()))
            .collect();

        tracks.sort_by_key(|t| t.id);
        tracks
    }
}

impl<P, E: Embedder<P>> Tracker<P> for DeepSort<E> {
    fn update(&mut self, detections: &[Detection], frame: &Frame<P>) -> Result<Vec<Track>> {
        let features = if detections.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(&frame.image, detections)?
        };

        if !features.is_empty() && features.len() != detections.len() {
            return Err(Error::Tracker(format!(
                "embedder returned {} features for {} detections",
                features.len(),
                detections.len()
            )));
        }

        let mut features = features.into_iter();
        let dets: Vec<_> = detections
            .iter()
            .map(|d| sort::Detection {
                bbox: d.bbox.clone(),
                confidence: d.score,
                feature: features.next(),
            })
            .collect();

        self.tracker.predict();
        self.tracker.update(&dets)?;

        let tracks = self.tracks();
        debug!(
            frame = frame.index,
            detections = detections.len(),
            tracks = tracks.len(),
            confirmed = tracks.iter().filter(|t| t.confirmed).count(),
            "tracker updated"
        );

        Ok(tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::VehicleClass;

    fn car(x: f32, y: f32) -> Detection {
        Detection {
            bbox: BBox::ltwh(x, y, 60.0, 40.0),
            score: 0.9,
            class: VehicleClass::Car,
        }
    }

    fn frame(index: u64) -> Frame<()> {
        Frame { index, image: () }
    }

    #[test]
    fn confirms_after_three_hits_and_keeps_id() {
        let mut tracker = DeepSort::without_appearance(&TrackerConfig::default());

        let t1 = tracker.update(&[car(100.0, 100.0)], &frame(0)).unwrap();
        let t2 = tracker.update(&[car(102.0, 104.0)], &frame(1)).unwrap();
        let t3 = tracker.update(&[car(104.0, 108.0)], &frame(2)).unwrap();

        assert!(!t1[0].confirmed);
        assert!(!t2[0].confirmed);
        assert!(t3[0].confirmed);
        assert_eq!(t1[0].id, t3[0].id);
    }

    #[test]
    fn empty_frames_age_tracks_out() {
        let config = TrackerConfig {
            max_age: 2,
            n_init: 1,
            ..TrackerConfig::default()
        };
        let mut tracker = DeepSort::without_appearance(&config);

        assert_eq!(tracker.update(&[car(0.0, 0.0)], &frame(0)).unwrap().len(), 1);
        assert_eq!(tracker.update(&[], &frame(1)).unwrap().len(), 1);
        assert_eq!(tracker.update(&[], &frame(2)).unwrap().len(), 1);
        assert!(tracker.update(&[], &frame(3)).unwrap().is_empty());
    }

    struct BadEmbedder;

    impl Embedder<()> for BadEmbedder {
        fn embed(&mut self, _: &(), _: &[Detection]) -> Result<Vec<Array1<f32>>> {
            Ok(vec![Array1::zeros(4)])
        }
    }

    #[test]
    fn embedder_must_cover_every_detection() {
        let mut tracker = DeepSort::new(&TrackerConfig::default(), BadEmbedder);

        let err = tracker.update(&[car(0.0, 0.0), car(200.0, 0.0)], &frame(0)).unwrap_err();
        assert!(matches!(err, Error::Tracker(_)));
    }
}
