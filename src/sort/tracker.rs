use std::collections::BTreeSet;

use ndarray::prelude::*;

use crate::error::{Error, Result};
use crate::sort::linear_assignment::{self, MatchResult};
use crate::sort::{iou_matching, Detection, DistanceMetric, KalmanFilter, Track};

/// This is the multi-target tracker.
///
/// ```text
///     Parameters
///     ----------
///     metric : DistanceMetric
///         A distance metric for measurement-to-track association.
///     max_iou_distance : f32
///         Gating threshold of the IoU association round.
///     max_age : u32
///         Maximum number of consecutive misses before a track is deleted.
///     n_init : u32
///         Number of consecutive detections before the track is confirmed. The
///         track state is set to `Deleted` if a miss occurs within the first
///         `n_init` frames.
///
///     Track identities start at 1 and are never reused.
/// ```
///
#[derive(Clone, Debug)]
pub struct Tracker<M: DistanceMetric> {
    metric: M,
    max_iou_distance: f32,
    max_age: u32,
    n_init: u32,
    kf: KalmanFilter,
    tracks: Vec<Track>,
    next_id: u64,
}

impl<M: DistanceMetric> Tracker<M> {
    pub fn new(metric: M, max_iou_distance: f32, max_age: u32, n_init: u32) -> Self {
        Self {
            metric,
            max_iou_distance,
            max_age,
            n_init,
            kf: Default::default(),
            next_id: 1,
            tracks: Vec::new(),
        }
    }

    #[inline]
    pub fn tracks(&self) -> &[Track] {
        self.tracks.as_slice()
    }

    ///
    /// Propagate track state distributions one time step forward.
    ///
    /// This function should be called once every time step, before `update`.
    ///
    pub fn predict(&mut self) {
        for track in &mut self.tracks {
            track.predict(&self.kf);
        }
    }

    /// Perform measurement update and track management.
    ///
    /// Detections either all carry appearance features, in which case
    /// confirmed tracks go through the appearance cascade first, or none do
    /// and association falls back to IoU against every live track.
    pub fn update(&mut self, detections: &[Detection]) -> Result<()> {
        let (matches, unmatched_tracks, unmatched_detections) = if has_features(detections) {
            self.match_with_appearance(detections)?
        } else {
            self.match_by_iou(detections)?
        };

        for (track_idx, detection_idx) in matches {
            self.tracks[track_idx].update(&self.kf, &detections[detection_idx])?;
        }

        for track_idx in unmatched_tracks {
            self.tracks[track_idx].mark_missed();
        }

        for detection_idx in unmatched_detections {
            self.initiate_track(&detections[detection_idx]);
        }

        self.tracks.retain(|t| !t.is_deleted());

        let (mut features, mut targets, mut active_targets) = (vec![], vec![], vec![]);

        for track in &mut self.tracks {
            if !track.is_confirmed() {
                continue;
            }

            active_targets.push(track.track_id);

            for feature in track.features.drain(..) {
                targets.push(track.track_id);
                features.push(feature);
            }
        }

        self.metric.partial_fit(features, targets, active_targets);

        Ok(())
    }

    fn match_with_appearance(&self, detections: &[Detection]) -> Result<MatchResult> {
        let gated_metric = |tracks: &[Track],
                            dets: &[Detection],
                            track_indices: &[usize],
                            detection_indices: &[usize]|
         -> Result<Array2<f32>> {
            let features = feature_matrix(dets, detection_indices)?;
            let targets: Vec<_> = track_indices.iter().map(|&i| tracks[i].track_id).collect();
            let mut cost_matrix = self.metric.distance(features.view(), &targets);

            linear_assignment::gate_cost_matrix(
                &self.kf,
                cost_matrix.view_mut(),
                tracks,
                dets,
                track_indices,
                detection_indices,
                None,
                None,
            )?;

            Ok(cost_matrix)
        };

        // Split track set into confirmed and unconfirmed tracks.
        let (mut confirmed_tracks, mut unconfirmed_tracks) = (vec![], vec![]);
        for (i, t) in self.tracks.iter().enumerate() {
            if t.is_confirmed() {
                confirmed_tracks.push(i);
            } else {
                unconfirmed_tracks.push(i);
            }
        }

        // Associate confirmed tracks using appearance features.
        let (matches_a, unmatched_tracks_a, unmatched_detections) = linear_assignment::matching_cascade(
            &gated_metric,
            self.metric.matching_threshold(),
            self.max_age,
            &self.tracks,
            detections,
            Some(confirmed_tracks),
            None,
        )?;

        // Associate remaining tracks together with unconfirmed tracks using IOU.
        let (iou_track_candidates, unmatched_tracks_a): (Vec<_>, Vec<_>) = unmatched_tracks_a
            .into_iter()
            .partition(|&k| self.tracks[k].time_since_update == 1);

        let iou_track_candidates = [unconfirmed_tracks, iou_track_candidates].concat();

        let (matches_b, unmatched_tracks_b, unmatched_detections) = linear_assignment::min_cost_matching(
            &iou_matching::iou_cost,
            self.max_iou_distance,
            &self.tracks,
            detections,
            Some(iou_track_candidates),
            Some(unmatched_detections),
        )?;

        let matches = [matches_a, matches_b].concat();
        let unmatched_tracks: BTreeSet<_> = unmatched_tracks_a.into_iter().chain(unmatched_tracks_b).collect();

        Ok((matches, unmatched_tracks.into_iter().collect(), unmatched_detections))
    }

    fn match_by_iou(&self, detections: &[Detection]) -> Result<MatchResult> {
        linear_assignment::min_cost_matching(
            &iou_matching::iou_cost_any_age,
            self.max_iou_distance,
            &self.tracks,
            detections,
            None,
            None,
        )
    }

    fn initiate_track(&mut self, detection: &Detection) {
        let (mean, covariance) = self.kf.initiate(detection.bbox.as_xyah());

        self.tracks.push(Track::new(
            mean,
            covariance,
            self.next_id,
            self.n_init,
            self.max_age,
            detection.feature.clone(),
        ));

        self.next_id += 1;
    }
}

fn has_features(detections: &[Detection]) -> bool {
    !detections.is_empty() && detections.iter().all(|d| d.feature.is_some())
}

fn feature_matrix(detections: &[Detection], indices: &[usize]) -> Result<Array2<f32>> {
    let dim = indices
        .first()
        .and_then(|&i| detections[i].feature.as_ref())
        .map_or(0, |f| f.len());

    let mut features = Array2::zeros((indices.len(), dim));

    for (mut row, &idx) in features.axis_iter_mut(Axis(0)).zip(indices) {
        match detections[idx].feature.as_ref() {
            Some(feature) if feature.len() == dim => row.assign(feature),
            Some(feature) => {
                return Err(Error::Tracker(format!(
                    "appearance feature length {} differs from {}",
                    feature.len(),
                    dim
                )))
            }
            None => return Err(Error::Tracker("detection without appearance feature".into())),
        }
    }

    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::{BBox, NearestNeighborDistanceMetric, NearestNeighborMetricKind};

    fn tracker(n_init: u32, max_age: u32) -> Tracker<NearestNeighborDistanceMetric> {
        let metric = NearestNeighborDistanceMetric::new(NearestNeighborMetricKind::CosineDistance, 0.2, Some(100));
        Tracker::new(metric, 0.7, max_age, n_init)
    }

    fn det(x: f32, y: f32, feature: Option<[f32; 3]>) -> Detection {
        Detection {
            bbox: BBox::ltwh(x, y, 40.0, 30.0),
            confidence: 0.9,
            feature: feature.map(|f| arr1(&f)),
        }
    }

    fn step(t: &mut Tracker<NearestNeighborDistanceMetric>, dets: &[Detection]) {
        t.predict();
        t.update(dets).unwrap();
    }

    #[test]
    fn moving_box_keeps_its_identity() {
        let mut t = tracker(3, 30);

        for i in 0..10 {
            step(&mut t, &[det(100.0 + 3.0 * i as f32, 50.0, None)]);
        }

        assert_eq!(t.tracks().len(), 1);
        assert_eq!(t.tracks()[0].track_id, 1);
        assert!(t.tracks()[0].is_confirmed());
    }

    #[test]
    fn confirmed_track_deleted_after_max_age_misses() {
        let mut t = tracker(2, 3);
        step(&mut t, &[det(10.0, 10.0, None)]);
        step(&mut t, &[det(10.0, 10.0, None)]);
        assert!(t.tracks()[0].is_confirmed());

        for _ in 0..3 {
            step(&mut t, &[]);
            assert_eq!(t.tracks().len(), 1);
        }

        step(&mut t, &[]);
        assert!(t.tracks().is_empty());
    }

    #[test]
    fn new_objects_never_reuse_identities() {
        let mut t = tracker(1, 0);
        step(&mut t, &[det(10.0, 10.0, None)]);
        step(&mut t, &[]);
        step(&mut t, &[]);
        step(&mut t, &[det(10.0, 10.0, None)]);

        assert_eq!(t.tracks().len(), 1);
        assert_eq!(t.tracks()[0].track_id, 2);
    }

    #[test]
    fn appearance_cascade_matches_confirmed_tracks() {
        let mut t = tracker(2, 30);
        let a = Some([1.0, 0.0, 0.0]);
        let b = Some([0.0, 1.0, 0.0]);

        for _ in 0..3 {
            step(&mut t, &[det(100.0, 100.0, a), det(300.0, 100.0, b)]);
        }

        let ids: Vec<_> = t.tracks().iter().map(|t| t.track_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(t.tracks().iter().all(Track::is_confirmed));

        // listed in swapped order, appearance keeps them apart
        step(&mut t, &[det(302.0, 100.0, b), det(102.0, 100.0, a)]);
        let first = t.tracks().iter().find(|t| t.track_id == 1).unwrap();
        assert!(first.bbox().cx() < 200.0);
        assert_eq!(t.tracks().len(), 2);
    }

    #[test]
    fn mismatched_feature_lengths_are_an_error() {
        let dets = vec![
            det(0.0, 0.0, Some([1.0, 0.0, 0.0])),
            Detection {
                feature: Some(arr1(&[1.0, 0.0])),
                ..det(50.0, 0.0, None)
            },
        ];

        assert!(feature_matrix(&dets, &[0, 1]).is_err());
    }
}
