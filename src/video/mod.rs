//! OpenCV implementations of the frame source, sink, display and canvas.

mod yolo;

pub use yolo::YoloModel;

use std::path::{Path, PathBuf};

use opencv::core::{Mat, Point, Scalar, Size};
use opencv::prelude::*;
use opencv::{highgui, imgproc, videoio};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pipeline::{Control, Display, FrameSink, FrameSource, VideoProperties};
use crate::render::{Canvas, Color};

pub const WINDOW_TITLE: &str = "Vehicle Tracking";

fn path_str(path: &Path) -> Option<&str> {
    path.to_str().filter(|s| !s.is_empty())
}

pub struct OpenCvCapture {
    cap: videoio::VideoCapture,
    props: VideoProperties,
}

impl OpenCvCapture {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let input_error = |reason: String| Error::Input {
            path: path.to_path_buf(),
            reason,
        };

        let name = path_str(path).ok_or_else(|| input_error("path is not valid UTF-8".into()))?;
        let cap = videoio::VideoCapture::from_file(name, videoio::CAP_ANY).map_err(|e| input_error(e.to_string()))?;

        if !cap.is_opened()? {
            return Err(input_error("could not open video file".into()));
        }

        let props = VideoProperties {
            width: cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32,
            height: cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32,
            fps: cap.get(videoio::CAP_PROP_FPS)?,
        };

        if props.width <= 0 || props.height <= 0 {
            return Err(input_error(format!("bad frame size {}x{}", props.width, props.height)));
        }

        debug!(path = %path.display(), ?props, "video opened");

        Ok(Self { cap, props })
    }
}

impl FrameSource for OpenCvCapture {
    type Image = Mat;

    fn properties(&self) -> VideoProperties {
        self.props
    }

    fn read(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();

        if !self.cap.read(&mut frame)? || frame.empty() {
            return Ok(None);
        }

        Ok(Some(frame))
    }

    fn release(&mut self) -> Result<()> {
        Ok(self.cap.release()?)
    }
}

/// `mp4v` writer with the source's size and frame rate. Closed on drop if
/// `release` was never called.
pub struct OpenCvWriter {
    writer: videoio::VideoWriter,
    path: PathBuf,
    released: bool,
}

impl OpenCvWriter {
    pub fn create<P: AsRef<Path>>(path: P, props: &VideoProperties) -> Result<Self> {
        let path = path.as_ref();
        let output_error = |reason: String| Error::Output {
            path: path.to_path_buf(),
            reason,
        };

        let name = path_str(path).ok_or_else(|| output_error("path is not valid UTF-8".into()))?;
        let fourcc = videoio::VideoWriter::fourcc('m', 'p', '4', 'v')?;
        // some containers report 0 fps
        let fps = if props.fps > 0.0 { props.fps } else { 30.0 };

        let writer = videoio::VideoWriter::new(name, fourcc, fps, Size::new(props.width, props.height), true)
            .map_err(|e| output_error(e.to_string()))?;

        if !writer.is_opened()? {
            return Err(output_error("video writer failed to open (mp4v)".into()));
        }

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink<Mat> for OpenCvWriter {
    fn write(&mut self, image: &Mat) -> Result<()> {
        Ok(self.writer.write(image)?)
    }

    fn release(&mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            self.writer.release()?;
        }

        Ok(())
    }
}

impl Drop for OpenCvWriter {
    fn drop(&mut self) {
        if let Err(err) = <Self as FrameSink<Mat>>::release(self) {
            warn!(path = %self.path.display(), error = %err, "failed to close video writer");
        }
    }
}

/// HighGUI window; `q` asks the run to stop.
pub struct HighGuiDisplay {
    title: String,
}

impl HighGuiDisplay {
    pub fn new(title: &str) -> Result<Self> {
        highgui::named_window(title, highgui::WINDOW_AUTOSIZE)?;

        Ok(Self { title: title.to_string() })
    }
}

impl Display<Mat> for HighGuiDisplay {
    fn show(&mut self, image: &Mat) -> Result<Control> {
        highgui::imshow(&self.title, image)?;

        if highgui::wait_key(1)? & 0xFF == 'q' as i32 {
            Ok(Control::Quit)
        } else {
            Ok(Control::Continue)
        }
    }

    fn close(&mut self) -> Result<()> {
        Ok(highgui::destroy_window(&self.title)?)
    }
}

#[inline]
fn scalar(color: Color) -> Scalar {
    Scalar::new(color.b as f64, color.g as f64, color.r as f64, 0.0)
}

impl Canvas for Mat {
    fn width(&self) -> i32 {
        self.cols()
    }

    fn draw_rect(
        &mut self,
        top_left: (i32, i32),
        bottom_right: (i32, i32),
        color: Color,
        thickness: i32,
    ) -> Result<()> {
        imgproc::rectangle_points(
            self,
            Point::new(top_left.0, top_left.1),
            Point::new(bottom_right.0, bottom_right.1),
            scalar(color),
            thickness,
            imgproc::LINE_8,
            0,
        )?;

        Ok(())
    }

    fn draw_line(&mut self, from: (i32, i32), to: (i32, i32), color: Color, thickness: i32) -> Result<()> {
        imgproc::line(
            self,
            Point::new(from.0, from.1),
            Point::new(to.0, to.1),
            scalar(color),
            thickness,
            imgproc::LINE_8,
            0,
        )?;

        Ok(())
    }

    fn draw_text(&mut self, text: &str, origin: (i32, i32), scale: f64, color: Color, thickness: i32) -> Result<()> {
        imgproc::put_text(
            self,
            text,
            Point::new(origin.0, origin.1),
            imgproc::FONT_HERSHEY_SIMPLEX,
            scale,
            scalar(color),
            thickness,
            imgproc::LINE_8,
            false,
        )?;

        Ok(())
    }
}
