use std::path::Path;

use ndarray::prelude::*;
use opencv::core::{self, Mat, Rect, Scalar, Size, Vector};
use opencv::dnn;
use opencv::prelude::*;

use crate::detection::Detection;
use crate::error::{Error, Result};
use crate::tracking::Embedder;

/// Person/vehicle re-identification network producing one appearance
/// feature per detection crop.
pub struct ImageEncoder {
    net: dnn::Net,
    out_names: Vector<String>,
    input_size: Size,
}

fn crop_rect(det: &Detection, frame_width: i32, frame_height: i32) -> Option<Rect> {
    let ltrb = det.ltrb();

    let left = (ltrb.left() as i32).clamp(0, frame_width);
    let top = (ltrb.top() as i32).clamp(0, frame_height);
    let right = (ltrb.right() as i32).clamp(0, frame_width);
    let bottom = (ltrb.bottom() as i32).clamp(0, frame_height);

    if right <= left || bottom <= top {
        return None;
    }

    Some(Rect::new(left, top, right - left, bottom - top))
}

impl ImageEncoder {
    /// Loads an ONNX encoder taking `64x128` BGR crops.
    pub fn new<P: AsRef<Path>>(model_filename: P) -> Result<Self> {
        Self::with_input_size(model_filename, Size::new(64, 128))
    }

    pub fn with_input_size<P: AsRef<Path>>(model_filename: P, input_size: Size) -> Result<Self> {
        let path = model_filename.as_ref();
        let name = path
            .to_str()
            .ok_or_else(|| Error::Model(format!("model path {:?} is not valid UTF-8", path)))?;

        let net = dnn::read_net_from_onnx(name)
            .map_err(|e| Error::Model(format!("cannot load {}: {}", path.display(), e)))?;
        let out_names = net.get_unconnected_out_layers_names()?;

        Ok(Self {
            net,
            out_names,
            input_size,
        })
    }

    #[inline]
    pub fn input_size(&self) -> Size {
        self.input_size
    }

    /// Runs the network over a batch of crops, one feature row per crop.
    pub fn encode_batch(&mut self, crops: &Vector<Mat>) -> Result<Array2<f32>> {
        let blob = dnn::blob_from_images(
            crops,
            1.0 / 255.0,
            self.input_size,
            Scalar::new(0., 0., 0., 0.),
            true,
            false,
            core::CV_32F,
        )?;

        self.net.set_input(&blob, "", 1.0, Scalar::new(0., 0., 0., 0.))?;

        let mut outs = Vector::<Mat>::new();
        self.net.forward(&mut outs, &self.out_names)?;

        let output = outs.get(0)?;
        let rows = crops.len();
        let data = output.data_typed::<f32>()?;

        if rows == 0 || data.len() % rows != 0 {
            return Err(Error::Model(format!(
                "encoder produced {} values for {} crops",
                data.len(),
                rows
            )));
        }

        Array2::from_shape_vec((rows, data.len() / rows), data.to_vec()).map_err(|e| Error::Model(e.to_string()))
    }
}

impl Embedder<Mat> for ImageEncoder {
    fn embed(&mut self, image: &Mat, detections: &[Detection]) -> Result<Vec<Array1<f32>>> {
        let (width, height) = (image.cols(), image.rows());
        let mut crops = Vector::<Mat>::new();
        let mut slots = Vec::with_capacity(detections.len());

        for det in detections {
            match crop_rect(det, width, height) {
                Some(rect) => {
                    slots.push(Some(crops.len()));
                    crops.push(Mat::roi(image, rect)?.try_clone()?);
                }
                None => slots.push(None),
            }
        }

        if crops.is_empty() {
            return Ok(Vec::new());
        }

        let features = self.encode_batch(&crops)?;
        let dim = features.ncols();

        // boxes entirely outside the frame get a zero feature
        Ok(slots
            .into_iter()
            .map(|slot| match slot {
                Some(row) => features.row(row).to_owned(),
                None => Array1::zeros(dim),
            })
            .collect())
    }
}
