use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use opencv::core::Mat;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vehicle_count::deep::ImageEncoder;
use vehicle_count::video::{HighGuiDisplay, OpenCvCapture, OpenCvWriter, YoloModel, WINDOW_TITLE};
use vehicle_count::{
    Config, DeepSort, Display, FrameSource, NoDisplay, Pipeline, Tracker, VehicleClass, VehicleDetector, VehicleFilter,
};

#[derive(Parser, Debug)]
#[command(name = "vehicle-count", version, about = "Detect, track and count vehicles crossing a line in a video")]
struct Args {
    /// Input video file
    source: Option<PathBuf>,

    /// Annotated output video, defaults to <stem>_processed.mp4 next to the input
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// JSON configuration file; command-line options take precedence
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// YOLOv8 ONNX model
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Re-identification ONNX model for appearance matching
    #[arg(long, value_name = "PATH")]
    reid_model: Option<PathBuf>,

    /// Counting line row in pixels, defaults to half the frame height
    #[arg(long)]
    line_position: Option<i32>,

    /// Half height of the counting band in pixels
    #[arg(long)]
    tolerance: Option<i32>,

    /// Minimum detection score, compared strictly
    #[arg(long)]
    confidence: Option<f32>,

    /// Vehicle classes to count, e.g. car,bus
    #[arg(long, value_delimiter = ',')]
    classes: Option<Vec<VehicleClass>>,

    /// Frames a vehicle may go unseen before its track is dropped
    #[arg(long)]
    max_age: Option<u32>,

    /// Do not open a preview window
    #[arg(long)]
    no_display: bool,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path).with_context(|| format!("loading {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(source) = self.source {
            config.source = source;
        }
        if self.output.is_some() {
            config.output = self.output;
        }
        if let Some(model) = self.model {
            config.detector.model = model;
        }
        if self.reid_model.is_some() {
            config.reid_model = self.reid_model;
        }
        if self.line_position.is_some() {
            config.line_position = self.line_position;
        }
        if let Some(tolerance) = self.tolerance {
            config.tolerance = tolerance;
        }
        if let Some(confidence) = self.confidence {
            config.confidence_threshold = confidence;
        }
        if let Some(classes) = self.classes {
            config.vehicle_classes = classes;
        }
        if let Some(max_age) = self.max_age {
            config.tracker.max_age = max_age;
        }
        if self.no_display {
            config.display = false;
        }

        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Args::parse().into_config()?;
    config.validate()?;

    run(config)
}

fn run(config: Config) -> Result<()> {
    info!(source = %config.source.display(), "Opening video capture");
    let source = OpenCvCapture::open(&config.source)?;
    let props = source.properties();
    info!("Video dimensions: {}x{}", props.width, props.height);

    info!(model = %config.detector.model.display(), "Loading YOLO model");
    let detector = VehicleDetector::new(
        YoloModel::load(&config.detector)?,
        VehicleFilter::new(config.confidence_threshold, config.vehicle_classes.iter().copied()),
    );

    info!(max_age = config.tracker.max_age, "Initializing DeepSORT tracker");
    let tracker: Box<dyn Tracker<Mat>> = match &config.reid_model {
        Some(path) => Box::new(DeepSort::new(&config.tracker, ImageEncoder::new(path)?)),
        None => Box::new(DeepSort::without_appearance(&config.tracker)),
    };

    let output = config.output_path();
    info!(output = %output.display(), "Setting up video writer");
    let sink = OpenCvWriter::create(&output, &props)?;

    let display: Box<dyn Display<Mat>> = if config.display {
        match HighGuiDisplay::new(WINDOW_TITLE) {
            Ok(window) => Box::new(window),
            Err(err) => {
                warn!("Failed to open display window: {}. Running headless.", err);
                Box::new(NoDisplay)
            }
        }
    } else {
        Box::new(NoDisplay)
    };

    let pipeline = Pipeline::new(source, detector, tracker, sink, config.counting_line(props.height))
        .with_display(display)
        .with_output(&output)
        .with_progress_interval(config.progress_interval);

    match pipeline.run() {
        Ok(report) => {
            println!("Processing complete! Total vehicles: {}", report.total);
            println!("Output saved: {}", output.display());
            Ok(())
        }
        Err(aborted) => {
            eprintln!(
                "Processing failed after {} frames, {} vehicles counted",
                aborted.report.frames, aborted.report.total
            );
            Err(aborted.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_overrides_defaults() {
        let args = Args::parse_from([
            "vehicle-count",
            "road.mp4",
            "--tolerance",
            "15",
            "--classes",
            "car,truck",
            "--max-age",
            "12",
            "--no-display",
        ]);
        let config = args.into_config().unwrap();

        assert_eq!(config.source, PathBuf::from("road.mp4"));
        assert_eq!(config.tolerance, 15);
        assert_eq!(config.vehicle_classes, vec![VehicleClass::Car, VehicleClass::Truck]);
        assert_eq!(config.tracker.max_age, 12);
        assert!(!config.display);
        assert_eq!(config.confidence_threshold, 0.4);
        assert_eq!(config.output_path(), PathBuf::from("road_processed.mp4"));
    }
}
