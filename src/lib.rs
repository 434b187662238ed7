//! Vehicle detection, tracking and line-crossing counting over a video stream.
//!
//! The frame loop lives in [`pipeline`]; detection, tracking, counting and
//! rendering are separate stages wired together through traits so that any
//! of them can be swapped for a scripted fake. OpenCV-backed implementations
//! of the video and model seams are behind the `video` feature.

pub mod config;
pub mod counting;
pub mod detection;
pub mod error;
pub mod pipeline;
pub mod render;
pub mod sort;
pub mod tracking;
pub mod yolo;

#[cfg(feature = "video")]
pub mod deep;
#[cfg(feature = "video")]
pub mod video;

pub use config::{Config, DetectorConfig, TrackerConfig};
pub use counting::{reference_point, CountState, CountingEngine, CountingLine, TrackPhase};
pub use detection::{Detection, DetectionModel, Detector, RawDetection, VehicleClass, VehicleDetector, VehicleFilter};
pub use error::{Aborted, Error, Result, Stage};
pub use pipeline::{
    CancellationToken, Control, Display, EndReason, Frame, FrameSink, FrameSource, NoDisplay, Pipeline, RunReport,
    StreamState, VideoProperties,
};
pub use render::{render, Canvas, Color, Overlay, Shape};
pub use tracking::{DeepSort, Embedder, NoEmbedder, Track, TrackId, Tracker};
