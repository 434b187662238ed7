//! DeepSORT multi-target tracker backing the tracker adapter.
//!
//! Kalman motion model in `(x, y, a, h)` space, Mahalanobis gating, an
//! appearance matching cascade for confirmed tracks and an IoU fallback,
//! with Hungarian assignment for every matching round.

pub mod detection;
pub mod iou_matching;
pub mod kalman_filter;
pub mod linear_assignment;
pub mod nn_matching;
pub mod track;
pub mod tracker;

pub use detection::Detection;
pub use kalman_filter::KalmanFilter;
pub use nn_matching::*;
pub use track::{Track, TrackState};
pub use tracker::Tracker;

use core::marker::PhantomData;
use ndarray::prelude::*;

pub trait BBoxFormat: std::fmt::Debug {}

/// Top-left corner, width, height.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ltwh;
impl BBoxFormat for Ltwh {}

/// Center x, center y, aspect ratio (w / h), height.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Xyah;
impl BBoxFormat for Xyah {}

/// Left, top, right, bottom.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ltrb;
impl BBoxFormat for Ltrb {}

#[derive(Debug, Clone, PartialEq)]
pub struct BBox<F: BBoxFormat>([f32; 4], PhantomData<F>);

impl<F: BBoxFormat> BBox<F> {
    #[inline]
    pub fn as_view(&self) -> ArrayView1<'_, f32> {
        aview1(&self.0)
    }

    #[inline]
    pub fn values(&self) -> [f32; 4] {
        self.0
    }
}

impl BBox<Ltwh> {
    #[inline]
    pub fn ltwh(left: f32, top: f32, width: f32, height: f32) -> Self {
        BBox([left, top, width, height], PhantomData)
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.0[3]
    }

    #[inline]
    pub fn as_xyah(&self) -> BBox<Xyah> {
        self.into()
    }

    #[inline]
    pub fn as_ltrb(&self) -> BBox<Ltrb> {
        self.into()
    }
}

impl BBox<Ltrb> {
    #[inline]
    pub fn ltrb(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        BBox([left, top, right, bottom], PhantomData)
    }

    #[inline]
    pub fn as_ltwh(&self) -> BBox<Ltwh> {
        self.into()
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn right(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn bottom(&self) -> f32 {
        self.0[3]
    }
}

impl BBox<Xyah> {
    #[inline]
    pub fn xyah(cx: f32, cy: f32, aspect: f32, height: f32) -> Self {
        BBox([cx, cy, aspect, height], PhantomData)
    }

    #[inline(always)]
    pub fn as_ltrb(&self) -> BBox<Ltrb> {
        self.into()
    }

    #[inline(always)]
    pub fn as_ltwh(&self) -> BBox<Ltwh> {
        self.into()
    }

    #[inline(always)]
    pub fn cx(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn cy(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.0[3]
    }
}

impl<'a> From<&'a BBox<Ltwh>> for BBox<Xyah> {
    #[inline]
    fn from(v: &'a BBox<Ltwh>) -> Self {
        Self::xyah(
            v.0[0] + v.0[2] / 2.0,
            v.0[1] + v.0[3] / 2.0,
            v.0[2] / v.0[3],
            v.0[3],
        )
    }
}

impl<'a> From<&'a BBox<Ltwh>> for BBox<Ltrb> {
    #[inline]
    fn from(v: &'a BBox<Ltwh>) -> Self {
        Self::ltrb(v.0[0], v.0[1], v.0[0] + v.0[2], v.0[1] + v.0[3])
    }
}

impl<'a> From<&'a BBox<Ltrb>> for BBox<Ltwh> {
    #[inline]
    fn from(v: &'a BBox<Ltrb>) -> Self {
        Self::ltwh(v.0[0], v.0[1], v.0[2] - v.0[0], v.0[3] - v.0[1])
    }
}

impl<'a> From<&'a BBox<Xyah>> for BBox<Ltwh> {
    #[inline]
    fn from(v: &'a BBox<Xyah>) -> Self {
        let height = v.0[3];
        let width = v.0[2] * height;

        Self::ltwh(v.0[0] - width / 2.0, v.0[1] - height / 2.0, width, height)
    }
}

impl<'a> From<&'a BBox<Xyah>> for BBox<Ltrb> {
    #[inline]
    fn from(v: &'a BBox<Xyah>) -> Self {
        (&v.as_ltwh()).into()
    }
}

/// Appearance distance between detections and the per-track sample gallery.
pub trait DistanceMetric {
    /// Costs above this are not a valid match.
    fn matching_threshold(&self) -> f32;

    /// Adds `features[i]` to the gallery of `targets[i]`, then forgets every
    /// target not listed in `active_targets`.
    fn partial_fit(&mut self, features: Vec<Array1<f32>>, targets: Vec<u64>, active_targets: Vec<u64>);

    /// Square cost matrix of side `max(targets.len(), features.nrows())`;
    /// `(i, j)` is the closest distance between `targets[i]`'s gallery and
    /// `features[j]`. Padding and unknown targets hold `INFTY_COST`.
    fn distance(&self, features: ArrayView2<'_, f32>, targets: &[u64]) -> Array2<f32>;
}
