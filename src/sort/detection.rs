use ndarray::prelude::*;

use crate::sort::{BBox, Ltwh};

///
/// A bounding box detection in a single image, as seen by the tracker.
///
/// bbox : BBox in format `(x, y, w, h)`.
/// confidence : f32 - Detector confidence score.
/// feature : Option<Array1<f32>> - Appearance vector of the object, if an
///     embedder produced one.
///
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BBox<Ltwh>,
    pub confidence: f32,
    pub feature: Option<Array1<f32>>,
}
