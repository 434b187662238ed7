//! YOLOv8 output decoding.
//!
//! The network emits a `[1, 4 + C, N]` tensor: for each of the `N` anchors a
//! center box `(cx, cy, w, h)` in network input pixels followed by `C` class
//! scores. There is no separate objectness score.

use crate::detection::RawDetection;
use crate::error::{Error, Result};

/// Decodes a row-major `[channels, anchors]` slice into corner boxes scaled
/// to frame pixels, keeping the best class of each anchor if its score
/// reaches `min_confidence`.
pub fn decode(
    data: &[f32],
    channels: usize,
    anchors: usize,
    scale: (f32, f32),
    min_confidence: f32,
) -> Result<Vec<RawDetection>> {
    if channels <= 4 {
        return Err(Error::Model(format!("expected more than 4 output channels, got {}", channels)));
    }

    if data.len() != channels * anchors {
        return Err(Error::Model(format!(
            "output holds {} values, expected {}x{}",
            data.len(),
            channels,
            anchors
        )));
    }

    let at = |channel: usize, anchor: usize| data[channel * anchors + anchor];
    let (sx, sy) = scale;
    let mut out = Vec::new();

    for anchor in 0..anchors {
        let (class_id, score) = (4..channels)
            .map(|c| (c - 4, at(c, anchor)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if score < min_confidence {
            continue;
        }

        let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));

        out.push(RawDetection::new(
            (cx - w / 2.0) * sx,
            (cy - h / 2.0) * sy,
            (cx + w / 2.0) * sx,
            (cy + h / 2.0) * sy,
            score,
            class_id as i32,
        ));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 4 box channels + 3 classes, 2 anchors, channel-major.
    fn tensor() -> Vec<f32> {
        vec![
            320.0, 100.0, // cx
            320.0, 100.0, // cy
            64.0, 20.0, // w
            32.0, 20.0, // h
            0.1, 0.05, // class 0
            0.2, 0.1, // class 1
            0.9, 0.1, // class 2
        ]
    }

    #[test]
    fn picks_best_class_and_scales_to_frame() {
        let dets = decode(&tensor(), 7, 2, (2.0, 1.125), 0.25).unwrap();

        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 2);
        assert_eq!(dets[0].score, 0.9);
        assert_eq!(dets[0].bbox.values(), [576.0, 342.0, 704.0, 378.0]);
    }

    #[test]
    fn rejects_malformed_output() {
        assert!(decode(&tensor(), 7, 3, (1.0, 1.0), 0.25).is_err());
        assert!(decode(&[0.0; 8], 4, 2, (1.0, 1.0), 0.25).is_err());
    }
}
