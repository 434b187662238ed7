use std::collections::BTreeSet;

use ndarray::prelude::*;

use crate::error::Result;
use crate::sort::{Detection, KalmanFilter, Track};

pub const INFTY_COST: f32 = 1e+5;

/// Matched `(track, detection)` pairs, unmatched tracks, unmatched detections.
pub type MatchResult = (Vec<(usize, usize)>, Vec<usize>, Vec<usize>);

/// Solve linear assignment problem.
///
/// Parameters
/// ----------
/// distance_metric : Fn(&[Track], &[Detection], &[usize], &[usize]) -> Result<Array2<f32>>
///     The distance metric is given a list of tracks and detections as well as
///     a list of N track indices and M detection indices. The metric should
///     return a square cost matrix of side max(N, M), where element (i, j) is
///     the association cost between the i-th track in the given track indices
///     and the j-th detection in the given detection indices.
/// max_distance : f32
///     Gating threshold. Associations with cost larger than this value are
///     disregarded.
/// track_indices : Option<Vec<usize>>
///     Rows of the cost matrix, defaults to all tracks.
/// detection_indices : Option<Vec<usize>>
///     Columns of the cost matrix, defaults to all detections.
///
/// Returns
/// -------
/// (matches, unmatched_tracks, unmatched_detections)
///
pub fn min_cost_matching<D>(
    distance_metric: &D,
    max_distance: f32,
    tracks: &[Track],
    detections: &[Detection],
    track_indices: Option<Vec<usize>>,
    detection_indices: Option<Vec<usize>>,
) -> Result<MatchResult>
where
    D: Fn(&[Track], &[Detection], &[usize], &[usize]) -> Result<Array2<f32>>,
{
    let track_indices = track_indices.unwrap_or_else(|| (0..tracks.len()).collect());
    let detection_indices = detection_indices.unwrap_or_else(|| (0..detections.len()).collect());

    if detection_indices.is_empty() || track_indices.is_empty() {
        return Ok((vec![], track_indices, detection_indices)); // Nothing to match.
    }

    let mut cost_matrix = distance_metric(tracks, detections, &track_indices, &detection_indices)?;
    cost_matrix.mapv_inplace(|x| if x > max_distance { max_distance + 1.0e-5 } else { x });

    let mut weights =
        munkres::WeightMatrix::from_row_vec(cost_matrix.nrows(), cost_matrix.iter().copied().collect());
    let indices = munkres::solve_assignment(&mut weights)?;

    let mut matched_rows = vec![false; track_indices.len()];
    let mut matched_cols = vec![false; detection_indices.len()];
    let mut matches = vec![];

    for pos in indices {
        if pos.row < track_indices.len() && pos.column < detection_indices.len() {
            if cost_matrix[(pos.row, pos.column)] > max_distance {
                continue;
            }

            matched_rows[pos.row] = true;
            matched_cols[pos.column] = true;
            matches.push((track_indices[pos.row], detection_indices[pos.column]));
        }
    }

    let unmatched_tracks = track_indices
        .iter()
        .zip(matched_rows)
        .filter_map(|(&idx, matched)| if matched { None } else { Some(idx) })
        .collect();

    let unmatched_detections = detection_indices
        .iter()
        .zip(matched_cols)
        .filter_map(|(&idx, matched)| if matched { None } else { Some(idx) })
        .collect();

    Ok((matches, unmatched_tracks, unmatched_detections))
}

/// Run matching cascade.
///
/// Tracks are matched level by level in order of `time_since_update`, so that
/// recently seen tracks get the first pick of the detections.
///
/// Parameters
/// ----------
/// cascade_depth : u32
///     The cascade depth, should be set to the maximum track age.
///
/// See `min_cost_matching` for the remaining parameters.
///
pub fn matching_cascade<D>(
    distance_metric: &D,
    max_distance: f32,
    cascade_depth: u32,
    tracks: &[Track],
    detections: &[Detection],
    track_indices: Option<Vec<usize>>,
    detection_indices: Option<Vec<usize>>,
) -> Result<MatchResult>
where
    D: Fn(&[Track], &[Detection], &[usize], &[usize]) -> Result<Array2<f32>>,
{
    let track_indices = track_indices.unwrap_or_else(|| (0..tracks.len()).collect());
    let mut unmatched_detections = detection_indices.unwrap_or_else(|| (0..detections.len()).collect());
    let mut matches = vec![];

    for level in 0..cascade_depth {
        if unmatched_detections.is_empty() {
            break;
        }

        let track_indices_l: Vec<_> = track_indices
            .iter()
            .copied()
            .filter(|&idx| tracks[idx].time_since_update == 1 + level)
            .collect();

        if track_indices_l.is_empty() {
            continue;
        }

        let (mut matches_l, _, unmatched_detections_new) = min_cost_matching(
            distance_metric,
            max_distance,
            tracks,
            detections,
            Some(track_indices_l),
            Some(unmatched_detections),
        )?;

        unmatched_detections = unmatched_detections_new;
        matches.append(&mut matches_l);
    }

    let matched: BTreeSet<_> = matches.iter().map(|&(k, _)| k).collect();
    let unmatched_tracks = track_indices.into_iter().filter(|k| !matched.contains(k)).collect();

    Ok((matches, unmatched_tracks, unmatched_detections))
}

/// Invalidate infeasible entries in cost matrix based on the state distributions
/// obtained by Kalman filtering.
///
/// Parameters
/// ----------
/// cost_matrix : ArrayViewMut2<f32>
///     Cost matrix where entry (i, j) is the association cost between
///     `tracks[track_indices[i]]` and `detections[detection_indices[j]]`.
/// gated_cost : Option<f32>
///     Value assigned to infeasible associations. Defaults to `INFTY_COST`.
/// only_position : Option<bool>
///     If true, only the x, y position of the state distribution is considered
///     during gating. Defaults to false.
///
#[allow(clippy::too_many_arguments)]
pub fn gate_cost_matrix(
    kf: &KalmanFilter,
    mut cost_matrix: ArrayViewMut2<'_, f32>,
    tracks: &[Track],
    detections: &[Detection],
    track_indices: &[usize],
    detection_indices: &[usize],
    gated_cost: Option<f32>,
    only_position: Option<bool>,
) -> Result<()> {
    let gated_cost = gated_cost.unwrap_or(INFTY_COST);
    let only_position = only_position.unwrap_or(false);
    let gating_dim = if only_position { 1 } else { 3 }; // 2 and 4 degrees of freedom
    let gating_threshold = crate::sort::kalman_filter::CHI_2_INV_95[gating_dim];

    let mut measurements = Array2::<f32>::zeros((detection_indices.len(), 4));

    for (mut row, &idx) in measurements.axis_iter_mut(Axis(0)).zip(detection_indices.iter()) {
        row.assign(&detections[idx].bbox.as_xyah().as_view());
    }

    for (row, &track_idx) in track_indices.iter().enumerate() {
        let track = &tracks[track_idx];
        let gating_distance = kf.gating_distance(track.mean(), track.covariance(), measurements.view(), only_position)?;

        let mut axis = cost_matrix.index_axis_mut(Axis(0), row);

        for (val, &distance) in axis.iter_mut().zip(gating_distance.iter()) {
            if distance > gating_threshold {
                *val = gated_cost;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::BBox;

    fn track_at(kf: &KalmanFilter, id: u64, x: f32, y: f32) -> Track {
        let (mean, cov) = kf.initiate(BBox::ltwh(x, y, 20.0, 20.0).as_xyah());
        Track::new(mean, cov, id, 3, 30, None)
    }

    fn det_at(x: f32, y: f32) -> Detection {
        Detection {
            bbox: BBox::ltwh(x, y, 20.0, 20.0),
            confidence: 0.9,
            feature: None,
        }
    }

    #[test]
    fn hungarian_prefers_global_minimum() {
        let kf = KalmanFilter::default();
        let tracks = vec![track_at(&kf, 1, 0.0, 0.0), track_at(&kf, 2, 100.0, 0.0)];
        let dets = vec![det_at(102.0, 0.0), det_at(1.0, 0.0)];

        let (matches, unmatched_tracks, unmatched_dets) = min_cost_matching(
            &crate::sort::iou_matching::iou_cost,
            0.7,
            &tracks,
            &dets,
            None,
            None,
        )
        .unwrap();

        let mut matches = matches;
        matches.sort();
        assert_eq!(matches, vec![(0, 1), (1, 0)]);
        assert!(unmatched_tracks.is_empty());
        assert!(unmatched_dets.is_empty());
    }

    #[test]
    fn costs_above_threshold_stay_unmatched() {
        let kf = KalmanFilter::default();
        let tracks = vec![track_at(&kf, 1, 0.0, 0.0)];
        let dets = vec![det_at(500.0, 500.0), det_at(2.0, 0.0)];

        let (matches, unmatched_tracks, unmatched_dets) = min_cost_matching(
            &crate::sort::iou_matching::iou_cost,
            0.7,
            &tracks,
            &dets,
            None,
            None,
        )
        .unwrap();

        assert_eq!(matches, vec![(0, 1)]);
        assert!(unmatched_tracks.is_empty());
        assert_eq!(unmatched_dets, vec![0]);
    }

    #[test]
    fn gating_blocks_far_detections() {
        let kf = KalmanFilter::default();
        let tracks = vec![track_at(&kf, 1, 0.0, 0.0)];
        let dets = vec![det_at(1.0, 1.0), det_at(600.0, 600.0)];
        let mut cost = Array2::<f32>::zeros((2, 2));

        gate_cost_matrix(&kf, cost.view_mut(), &tracks, &dets, &[0], &[0, 1], None, None).unwrap();

        assert_eq!(cost[(0, 0)], 0.0);
        assert_eq!(cost[(0, 1)], INFTY_COST);
    }
}
