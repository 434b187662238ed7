//! The frame loop: read, detect, track, count, render, write, display.
//!
//! A run walks `Opened -> {Reading <-> Processing} -> Closed`. The source and
//! sink are released on every exit path, including stage failures and user
//! cancellation, and the counts gathered so far are always handed back.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::counting::{CountingEngine, CountingLine};
use crate::detection::Detector;
use crate::error::{Aborted, Error, Result, Stage};
use crate::render::{annotate, Canvas};
use crate::tracking::{TrackId, Tracker};

/// One decoded image and its 1-based position in the stream.
#[derive(Debug, Clone)]
pub struct Frame<P> {
    pub index: u64,
    pub image: P,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct VideoProperties {
    pub width: i32,
    pub height: i32,
    pub fps: f64,
}

pub trait FrameSource {
    type Image;

    fn properties(&self) -> VideoProperties;

    /// Next frame, `None` at end of stream.
    fn read(&mut self) -> Result<Option<Self::Image>>;

    fn release(&mut self) -> Result<()>;
}

pub trait FrameSink<P> {
    fn write(&mut self, image: &P) -> Result<()>;

    /// Flushes and closes the output.
    fn release(&mut self) -> Result<()>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

/// Live preview of annotated frames.
pub trait Display<P> {
    fn show(&mut self, image: &P) -> Result<Control>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<P, V: Display<P> + ?Sized> Display<P> for Box<V> {
    fn show(&mut self, image: &P) -> Result<Control> {
        (**self).show(image)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoDisplay;

impl<P> Display<P> for NoDisplay {
    fn show(&mut self, _: &P) -> Result<Control> {
        Ok(Control::Continue)
    }
}

/// Shared stop flag, checked before every read.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamState {
    Opened,
    Reading,
    Processing,
    Closed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EndReason {
    EndOfStream,
    /// The source failed to decode a frame; treated like end of stream.
    ReadFailure,
    Cancelled,
    /// A stage failed; only seen inside `Aborted`.
    Failed,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EndReason::EndOfStream => "end of stream",
            EndReason::ReadFailure => "read failure",
            EndReason::Cancelled => "cancelled",
            EndReason::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub total: u64,
    pub counted_ids: BTreeSet<TrackId>,
    pub frames: u64,
    pub output: Option<PathBuf>,
    pub end: EndReason,
}

pub struct Pipeline<S, D, T, W, V = NoDisplay> {
    source: S,
    detector: D,
    tracker: T,
    sink: W,
    display: V,
    line: CountingLine,
    output: Option<PathBuf>,
    progress_interval: u64,
    cancel: CancellationToken,
}

impl<S, D, T, W> Pipeline<S, D, T, W, NoDisplay>
where
    S: FrameSource,
    S::Image: Canvas,
    D: Detector<S::Image>,
    T: Tracker<S::Image>,
    W: FrameSink<S::Image>,
{
    pub fn new(source: S, detector: D, tracker: T, sink: W, line: CountingLine) -> Self {
        Self {
            source,
            detector,
            tracker,
            sink,
            display: NoDisplay,
            line,
            output: None,
            progress_interval: 30,
            cancel: CancellationToken::new(),
        }
    }
}

impl<S, D, T, W, V> Pipeline<S, D, T, W, V>
where
    S: FrameSource,
    S::Image: Canvas,
    D: Detector<S::Image>,
    T: Tracker<S::Image>,
    W: FrameSink<S::Image>,
    V: Display<S::Image>,
{
    pub fn with_display<V2: Display<S::Image>>(self, display: V2) -> Pipeline<S, D, T, W, V2> {
        Pipeline {
            source: self.source,
            detector: self.detector,
            tracker: self.tracker,
            sink: self.sink,
            display,
            line: self.line,
            output: self.output,
            progress_interval: self.progress_interval,
            cancel: self.cancel,
        }
    }

    /// Output location echoed back in the report.
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Frames between progress log lines, 0 disables them.
    pub fn with_progress_interval(mut self, frames: u64) -> Self {
        self.progress_interval = frames;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn run(mut self) -> std::result::Result<RunReport, Aborted> {
        let props = self.source.properties();
        let mut state = StreamState::Opened;
        let mut engine = CountingEngine::new(self.line);
        let mut frames = 0u64;

        info!(
            width = props.width,
            height = props.height,
            fps = props.fps,
            line = self.line.y,
            tolerance = self.line.tolerance,
            "Starting video processing"
        );

        let outcome = loop {
            if self.cancel.is_cancelled() {
                info!("Processing stopped by user");
                break Ok(EndReason::Cancelled);
            }

            state = transition(state, StreamState::Reading);
            let image = match self.source.read() {
                Ok(Some(image)) => image,
                Ok(None) => {
                    info!("End of video reached");
                    break Ok(EndReason::EndOfStream);
                }
                Err(err) => {
                    warn!(frame = frames + 1, error = %err, "frame read failed, closing stream");
                    break Ok(EndReason::ReadFailure);
                }
            };

            state = transition(state, StreamState::Processing);
            frames += 1;

            let frame = Frame { index: frames, image };
            match self.process(&mut engine, frame) {
                Ok(Control::Continue) => {}
                Ok(Control::Quit) => self.cancel.cancel(),
                Err(err) => break Err(err),
            }

            if self.progress_interval > 0 && frames % self.progress_interval == 0 {
                info!(frame = frames, total = engine.total(), "Processing frame {}", frames);
            }
        };

        transition(state, StreamState::Closed);
        let released = self.release_all();

        let state = engine.into_state();
        let mut report = RunReport {
            total: state.total,
            counted_ids: state.counted_ids,
            frames,
            output: self.output.take(),
            end: EndReason::Failed,
        };

        let outcome = match (outcome, released) {
            (Ok(end), Ok(())) => Ok(end),
            (Ok(_), Err(err)) => Err(Error::at(Stage::Write, frames, err)),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => {
                warn!(error = %release_err, "failed to release video sink");
                Err(err)
            }
        };

        match outcome {
            Ok(end) => {
                report.end = end;
                info!(
                    total = report.total,
                    frames,
                    end = %end,
                    "Processing complete! Total vehicles: {}",
                    report.total
                );
                if let Some(output) = &report.output {
                    info!("Output saved: {}", output.display());
                }

                Ok(report)
            }
            Err(cause) => {
                warn!(total = report.total, frames, error = %cause, "run aborted");
                Err(Aborted { report, cause })
            }
        }
    }

    fn process(&mut self, engine: &mut CountingEngine, mut frame: Frame<S::Image>) -> Result<Control> {
        let index = frame.index;

        let detections = self
            .detector
            .detect(&frame)
            .map_err(|e| Error::at(Stage::Detect, index, e))?;

        let tracks = self
            .tracker
            .update(&detections, &frame)
            .map_err(|e| Error::at(Stage::Track, index, e))?;

        engine.update(&tracks);

        annotate(&mut frame.image, &tracks, &engine.line(), engine.total())
            .map_err(|e| Error::at(Stage::Render, index, e))?;

        self.sink
            .write(&frame.image)
            .map_err(|e| Error::at(Stage::Write, index, e))?;

        self.display
            .show(&frame.image)
            .map_err(|e| Error::at(Stage::Display, index, e))
    }

    // Releases every handle even when one of them fails; the writer's error
    // wins since it means the output file is incomplete.
    fn release_all(&mut self) -> Result<()> {
        if let Err(err) = self.source.release() {
            warn!(error = %err, "failed to release video source");
        }

        if let Err(err) = self.display.close() {
            warn!(error = %err, "failed to close display");
        }

        self.sink.release()
    }
}

fn transition(from: StreamState, to: StreamState) -> StreamState {
    if from != to {
        debug!(?from, ?to, "stream state");
    }

    to
}
