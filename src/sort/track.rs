use ndarray::prelude::*;

use crate::error::Result;
use crate::sort::{BBox, Detection, KalmanFilter, Xyah};

///
///   Enumeration type for the single target track state. Newly created tracks are
///   classified as `Tentative` until enough evidence has been collected. Then,
///   the track state is changed to `Confirmed`. Tracks that are no longer alive
///   are classified as `Deleted` to mark them for removal from the set of active
///   tracks.
///
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrackState {
    Tentative,
    Confirmed,
    Deleted,
}

///
///     A single target track with state space `(x, y, a, h)` and associated
///     velocities, where `(x, y)` is the center of the bounding box, `a` is the
///     aspect ratio and `h` is the height.
///
///     Attributes
///     ----------
///     track_id : u64
///         A unique track identifier, never reused within a tracker.
///     hits : u32
///         Total number of measurement updates.
///     age : u32
///         Total number of frames since first occurrence.
///     time_since_update : u32
///         Total number of frames since last measurement update.
///     state : TrackState
///         The current track state.
///     features : Vec<Array1<f32>>
///         Features gathered since the last metric fit. Drained by the tracker
///         every frame.
///
#[derive(Clone, Debug)]
pub struct Track {
    pub track_id: u64,
    pub time_since_update: u32,
    pub features: Vec<Array1<f32>>,

    covariance: Array2<f32>,
    mean: Array1<f32>,
    hits: u32,
    age: u32,
    state: TrackState,
    n_init: u32,
    max_age: u32,
}

impl Track {
    pub fn new(
        mean: Array1<f32>,
        covariance: Array2<f32>,
        track_id: u64,
        n_init: u32,
        max_age: u32,
        feature: Option<Array1<f32>>,
    ) -> Self {
        Self {
            track_id,
            mean,
            covariance,
            hits: 1,
            age: 1,
            time_since_update: 0,
            state: if n_init <= 1 { TrackState::Confirmed } else { TrackState::Tentative },
            features: feature.into_iter().collect(),
            n_init,
            max_age,
        }
    }

    /// Current position as `(center x, center y, aspect ratio, height)`.
    #[inline]
    pub fn bbox(&self) -> BBox<Xyah> {
        BBox::xyah(self.mean[0], self.mean[1], self.mean[2], self.mean[3])
    }

    #[inline]
    pub fn mean(&self) -> ArrayView1<'_, f32> {
        self.mean.view()
    }

    #[inline]
    pub fn covariance(&self) -> ArrayView2<'_, f32> {
        self.covariance.view()
    }

    #[inline]
    pub fn hits(&self) -> u32 {
        self.hits
    }

    #[inline]
    pub fn age(&self) -> u32 {
        self.age
    }

    #[inline]
    pub fn state(&self) -> TrackState {
        self.state
    }

    /// Propagate the state distribution to the current time step using a
    /// Kalman filter prediction step.
    pub fn predict(&mut self, kf: &KalmanFilter) {
        let (mean, covariance) = kf.predict(self.mean.view(), self.covariance.view());
        self.mean = mean;
        self.covariance = covariance;
        self.age += 1;
        self.time_since_update += 1;
    }

    /// Perform Kalman filter measurement update step and update the feature cache.
    pub fn update(&mut self, kf: &KalmanFilter, detection: &Detection) -> Result<()> {
        let (mean, covariance) = kf.update(
            self.mean.view(),
            self.covariance.view(),
            detection.bbox.as_xyah().as_view(),
        )?;

        self.mean = mean;
        self.covariance = covariance;
        self.features.extend(detection.feature.clone());

        self.hits += 1;
        self.time_since_update = 0;

        if self.state == TrackState::Tentative && self.hits >= self.n_init {
            self.state = TrackState::Confirmed;
        }

        Ok(())
    }

    ///
    /// Mark this track as missed (no association at the current time step).
    ///
    #[inline]
    pub fn mark_missed(&mut self) {
        if self.state == TrackState::Tentative || self.time_since_update > self.max_age {
            self.state = TrackState::Deleted;
        }
    }

    #[inline]
    pub fn is_tentative(&self) -> bool {
        self.state == TrackState::Tentative
    }

    #[inline]
    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.state == TrackState::Deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_track(n_init: u32, max_age: u32) -> (KalmanFilter, Track, Detection) {
        let kf = KalmanFilter::default();
        let det = Detection {
            bbox: BBox::ltwh(10.0, 10.0, 30.0, 60.0),
            confidence: 0.9,
            feature: None,
        };
        let (mean, cov) = kf.initiate(det.bbox.as_xyah());

        (kf, Track::new(mean, cov, 1, n_init, max_age, None), det)
    }

    #[test]
    fn confirmed_after_n_init_hits() {
        let (kf, mut track, det) = new_track(3, 30);
        assert!(track.is_tentative());

        track.predict(&kf);
        track.update(&kf, &det).unwrap();
        assert!(track.is_tentative());

        track.predict(&kf);
        track.update(&kf, &det).unwrap();
        assert!(track.is_confirmed());
        assert_eq!(track.hits(), 3);
    }

    #[test]
    fn tentative_track_dies_on_first_miss() {
        let (kf, mut track, _) = new_track(3, 30);
        track.predict(&kf);
        track.mark_missed();

        assert!(track.is_deleted());
    }

    #[test]
    fn confirmed_track_survives_until_max_age() {
        let (kf, mut track, _) = new_track(1, 2);
        assert!(track.is_confirmed());

        for _ in 0..2 {
            track.predict(&kf);
            track.mark_missed();
            assert!(track.is_confirmed());
        }

        track.predict(&kf);
        track.mark_missed();
        assert!(track.is_deleted());
    }
}
