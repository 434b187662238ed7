use ndarray::prelude::*;

use crate::error::Result;
use crate::sort::{BBox, Detection, Ltwh, Track};

/// Computes intersection over union.
///
/// Parameters
/// ----------
/// bbox : BBox<Ltwh>
///     A bounding box in format `(top left x, top left y, width, height)`.
/// candidates : &[BBox<Ltwh>]
///     Candidate bounding boxes in the same format as `bbox`.
///
/// Returns
/// -------
/// Array1<f32>
///     The intersection over union in [0, 1] between the `bbox` and each
///     candidate. Degenerate boxes with no area yield 0.
pub fn iou(bbox: &BBox<Ltwh>, candidates: &[BBox<Ltwh>]) -> Array1<f32> {
    let bbox_area = bbox.width() * bbox.height();
    let b1 = bbox.as_ltrb();

    candidates
        .iter()
        .map(|c_ltwh| {
            let b2 = c_ltwh.as_ltrb();

            let i_xmin = b1.left().max(b2.left());
            let i_ymin = b1.top().max(b2.top());

            let i_xmax = b1.right().min(b2.right());
            let i_ymax = b1.bottom().min(b2.bottom());

            let intersection_area = (i_xmax - i_xmin).max(0.0) * (i_ymax - i_ymin).max(0.0);
            let union_area = bbox_area + c_ltwh.width() * c_ltwh.height() - intersection_area;

            if union_area > 0.0 {
                intersection_area / union_area
            } else {
                0.0
            }
        })
        .collect()
}

///
/// An intersection over union distance metric.
///
/// Returns
/// -------
/// Array2<f32>
///     A square cost matrix of side max(len(track_indices), len(detection_indices))
///     where entry (i, j) is
///     `1 - iou(tracks[track_indices[i]], detections[detection_indices[j]])`.
///     Tracks that missed more than one frame keep a cost of 1 everywhere.
///
pub fn iou_cost(
    tracks: &[Track],
    detections: &[Detection],
    track_indices: &[usize],
    detection_indices: &[usize],
) -> Result<Array2<f32>> {
    Ok(cost_matrix(tracks, detections, track_indices, detection_indices, 1))
}

/// Same as `iou_cost`, but every live track is compared at its predicted
/// position regardless of how many frames it missed. Used when detections
/// carry no appearance features.
pub fn iou_cost_any_age(
    tracks: &[Track],
    detections: &[Detection],
    track_indices: &[usize],
    detection_indices: &[usize],
) -> Result<Array2<f32>> {
    Ok(cost_matrix(tracks, detections, track_indices, detection_indices, u32::MAX))
}

fn cost_matrix(
    tracks: &[Track],
    detections: &[Detection],
    track_indices: &[usize],
    detection_indices: &[usize],
    max_staleness: u32,
) -> Array2<f32> {
    let det_n = detection_indices.len();
    let n = track_indices.len().max(det_n);

    let mut cost_matrix = Array2::from_elem((n, n), 1.0);

    let candidates: Vec<_> = detection_indices
        .iter()
        .map(|&i| detections[i].bbox.clone())
        .collect();

    for (row, &track_idx) in track_indices.iter().enumerate() {
        let track = &tracks[track_idx];

        if track.time_since_update > max_staleness {
            continue;
        }

        let bbox = track.bbox().as_ltwh();

        cost_matrix
            .slice_mut(s![row, ..det_n])
            .assign(&(1.0 - iou(&bbox, &candidates)));
    }

    cost_matrix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let b = BBox::ltwh(0.0, 0.0, 10.0, 10.0);
        let r = iou(
            &b,
            &[
                BBox::ltwh(0.0, 0.0, 10.0, 10.0),
                BBox::ltwh(20.0, 20.0, 10.0, 10.0),
                BBox::ltwh(5.0, 0.0, 10.0, 10.0),
            ],
        );

        assert!((r[0] - 1.0).abs() < 1e-6);
        assert_eq!(r[1], 0.0);
        assert!((r[2] - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn zero_area_boxes_have_no_overlap() {
        let b = BBox::ltwh(0.0, 0.0, 0.0, 0.0);
        assert_eq!(iou(&b, &[BBox::ltwh(0.0, 0.0, 0.0, 0.0)])[0], 0.0);
    }
}
