//! Detector adapter: runs a detection model on a frame and keeps vehicles.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Error, Result};
use crate::pipeline::Frame;
use crate::sort::{BBox, Ltrb, Ltwh};

/// Vehicle categories of the COCO label set.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Car,
    Motorcycle,
    Bus,
    Truck,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 4] = [
        VehicleClass::Car,
        VehicleClass::Motorcycle,
        VehicleClass::Bus,
        VehicleClass::Truck,
    ];

    #[inline]
    pub fn coco_id(self) -> i32 {
        match self {
            VehicleClass::Car => 2,
            VehicleClass::Motorcycle => 3,
            VehicleClass::Bus => 5,
            VehicleClass::Truck => 7,
        }
    }

    pub fn from_coco_id(id: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.coco_id() == id)
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VehicleClass::Car => "car",
            VehicleClass::Motorcycle => "motorcycle",
            VehicleClass::Bus => "bus",
            VehicleClass::Truck => "truck",
        })
    }
}

impl FromStr for VehicleClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "car" => Ok(VehicleClass::Car),
            "motorcycle" | "motorbike" => Ok(VehicleClass::Motorcycle),
            "bus" => Ok(VehicleClass::Bus),
            "truck" => Ok(VehicleClass::Truck),
            other => match other.parse::<i32>().ok().and_then(Self::from_coco_id) {
                Some(class) => Ok(class),
                None => Err(Error::Config(format!("unknown vehicle class {:?}", s))),
            },
        }
    }
}

/// A model candidate before filtering: corner box in frame pixels, score and
/// the model's class index.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox: BBox<Ltrb>,
    pub score: f32,
    pub class_id: i32,
}

impl RawDetection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32, class_id: i32) -> Self {
        Self {
            bbox: BBox::ltrb(x1, y1, x2, y2),
            score,
            class_id,
        }
    }
}

/// A vehicle kept for tracking, box in `(left, top, width, height)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BBox<Ltwh>,
    pub score: f32,
    pub class: VehicleClass,
}

impl Detection {
    #[inline]
    pub fn ltrb(&self) -> BBox<Ltrb> {
        self.bbox.as_ltrb()
    }
}

/// Anything that turns an image into raw candidates.
pub trait DetectionModel<P> {
    fn infer(&mut self, image: &P) -> Result<Vec<RawDetection>>;
}

pub trait Detector<P> {
    fn detect(&mut self, frame: &Frame<P>) -> Result<Vec<Detection>>;
}

impl<P, D: Detector<P> + ?Sized> Detector<P> for Box<D> {
    fn detect(&mut self, frame: &Frame<P>) -> Result<Vec<Detection>> {
        (**self).detect(frame)
    }
}

/// Class and confidence gate applied to raw candidates.
#[derive(Debug, Clone)]
pub struct VehicleFilter {
    confidence_threshold: f32,
    classes: BTreeSet<VehicleClass>,
}

impl VehicleFilter {
    pub fn new(confidence_threshold: f32, classes: impl IntoIterator<Item = VehicleClass>) -> Self {
        Self {
            confidence_threshold,
            classes: classes.into_iter().collect(),
        }
    }

    /// Keeps a candidate only if its class is selected and its score is
    /// strictly above the threshold. NaN scores never pass.
    pub fn accept(&self, raw: &RawDetection) -> Option<Detection> {
        let class = VehicleClass::from_coco_id(raw.class_id)?;

        let above = raw.score.partial_cmp(&self.confidence_threshold) == Some(Ordering::Greater);
        if !above || !self.classes.contains(&class) {
            return None;
        }

        Some(Detection {
            bbox: raw.bbox.as_ltwh(),
            score: raw.score,
            class,
        })
    }

    pub fn apply(&self, raw: Vec<RawDetection>) -> Vec<Detection> {
        raw.iter().filter_map(|r| self.accept(r)).collect()
    }
}

/// `Detector` over any `DetectionModel`, keeping vehicles only.
pub struct VehicleDetector<M> {
    model: M,
    filter: VehicleFilter,
}

impl<M> VehicleDetector<M> {
    pub fn new(model: M, filter: VehicleFilter) -> Self {
        Self { model, filter }
    }
}

impl<P, M: DetectionModel<P>> Detector<P> for VehicleDetector<M> {
    fn detect(&mut self, frame: &Frame<P>) -> Result<Vec<Detection>> {
        let raw = self.model.infer(&frame.image)?;
        let candidates = raw.len();
        let detections = self.filter.apply(raw);

        trace!(frame = frame.index, candidates, kept = detections.len(), "detections filtered");

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(Vec<RawDetection>);

    impl DetectionModel<()> for Scripted {
        fn infer(&mut self, _: &()) -> Result<Vec<RawDetection>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn keeps_vehicle_classes_strictly_above_threshold() {
        let filter = VehicleFilter::new(0.4, VehicleClass::ALL);
        let raw = vec![
            RawDetection::new(0.0, 0.0, 10.0, 10.0, 0.9, 2),
            RawDetection::new(0.0, 0.0, 10.0, 10.0, 0.4, 7),
            RawDetection::new(0.0, 0.0, 10.0, 10.0, 0.41, 5),
            RawDetection::new(0.0, 0.0, 10.0, 10.0, 0.99, 0),
            RawDetection::new(0.0, 0.0, 10.0, 10.0, 0.99, 3),
            RawDetection::new(0.0, 0.0, 10.0, 10.0, f32::NAN, 2),
        ];

        let classes: Vec<_> = filter.apply(raw).into_iter().map(|d| d.class).collect();
        assert_eq!(classes, vec![VehicleClass::Car, VehicleClass::Bus, VehicleClass::Motorcycle]);
    }

    #[test]
    fn respects_class_selection() {
        let filter = VehicleFilter::new(0.1, [VehicleClass::Truck]);

        assert!(filter.accept(&RawDetection::new(0.0, 0.0, 1.0, 1.0, 0.9, 2)).is_none());
        assert!(filter.accept(&RawDetection::new(0.0, 0.0, 1.0, 1.0, 0.9, 7)).is_some());
    }

    #[test]
    fn converts_corners_to_ltwh() {
        let mut detector = VehicleDetector::new(
            Scripted(vec![RawDetection::new(100.0, 50.0, 180.0, 110.0, 0.8, 2)]),
            VehicleFilter::new(0.4, VehicleClass::ALL),
        );

        let dets = detector.detect(&Frame { index: 0, image: () }).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox.values(), [100.0, 50.0, 80.0, 60.0]);
        assert_eq!(dets[0].ltrb().values(), [100.0, 50.0, 180.0, 110.0]);
    }

    #[test]
    fn class_names_parse() {
        assert_eq!("Bus".parse::<VehicleClass>().unwrap(), VehicleClass::Bus);
        assert_eq!("7".parse::<VehicleClass>().unwrap(), VehicleClass::Truck);
        assert!("person".parse::<VehicleClass>().is_err());
        assert_eq!(VehicleClass::Motorcycle.to_string(), "motorcycle");
    }
}
