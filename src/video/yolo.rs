use std::collections::BTreeMap;
use std::path::Path;

use opencv::core::{self, Mat, Rect2d, Scalar, Size, Vector};
use opencv::dnn;
use opencv::prelude::*;
use tracing::debug;

use crate::config::DetectorConfig;
use crate::detection::{DetectionModel, RawDetection};
use crate::error::{Error, Result};
use crate::yolo;

/// YOLOv8 ONNX network run through OpenCV DNN.
pub struct YoloModel {
    net: dnn::Net,
    out_names: Vector<String>,
    input_size: i32,
    min_confidence: f32,
    nms_threshold: f32,
}

impl YoloModel {
    pub fn load(config: &DetectorConfig) -> Result<Self> {
        let path: &Path = &config.model;
        let name = path
            .to_str()
            .ok_or_else(|| Error::Model(format!("model path {:?} is not valid UTF-8", path)))?;

        let mut net = dnn::read_net_from_onnx(name)
            .map_err(|e| Error::Model(format!("cannot load {}: {}", path.display(), e)))?;

        net.set_preferable_backend(dnn::DNN_BACKEND_DEFAULT)?;
        net.set_preferable_target(dnn::DNN_TARGET_CPU)?;

        let out_names = net.get_unconnected_out_layers_names()?;

        Ok(Self {
            net,
            out_names,
            input_size: config.input_size,
            min_confidence: config.min_confidence,
            nms_threshold: config.nms_threshold,
        })
    }

    // Per-class non-maximum suppression.
    fn suppress(&self, candidates: Vec<RawDetection>) -> Result<Vec<RawDetection>> {
        let mut by_class: BTreeMap<i32, Vec<RawDetection>> = BTreeMap::new();
        for det in candidates {
            by_class.entry(det.class_id).or_default().push(det);
        }

        let mut kept = Vec::new();

        for (_, dets) in by_class {
            let rects: Vector<Rect2d> = dets
                .iter()
                .map(|d| {
                    let b = d.bbox.as_ltwh();
                    Rect2d::new(b.left() as f64, b.top() as f64, b.width() as f64, b.height() as f64)
                })
                .collect();
            let scores: Vector<f32> = dets.iter().map(|d| d.score).collect();

            let mut indices = Vector::<i32>::new();
            dnn::nms_boxes_f64(&rects, &scores, self.min_confidence, self.nms_threshold, &mut indices, 1.0, 0)?;

            kept.extend(
                indices
                    .iter()
                    .filter_map(|idx| usize::try_from(idx).ok())
                    .filter_map(|idx| dets.get(idx).cloned()),
            );
        }

        Ok(kept)
    }
}

impl DetectionModel<Mat> for YoloModel {
    fn infer(&mut self, image: &Mat) -> Result<Vec<RawDetection>> {
        let blob = dnn::blob_from_image(
            image,
            1.0 / 255.0,
            Size::new(self.input_size, self.input_size),
            Scalar::new(0., 0., 0., 0.),
            true,
            false,
            core::CV_32F,
        )?;

        self.net.set_input(&blob, "", 1.0, Scalar::new(0., 0., 0., 0.))?;

        let mut outs = Vector::<Mat>::new();
        self.net.forward(&mut outs, &self.out_names)?;

        let output = outs.get(0)?;
        let dims = output.mat_size();
        if dims.len() != 3 {
            return Err(Error::Model(format!("unexpected output rank {}", dims.len())));
        }

        let (channels, anchors) = (dims[1] as usize, dims[2] as usize);
        let scale = (
            image.cols() as f32 / self.input_size as f32,
            image.rows() as f32 / self.input_size as f32,
        );

        let candidates = yolo::decode(output.data_typed::<f32>()?, channels, anchors, scale, self.min_confidence)?;
        let before = candidates.len();
        let kept = self.suppress(candidates)?;

        debug!(candidates = before, kept = kept.len(), "yolo inference");

        Ok(kept)
    }
}
