use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use vehicle_count::sort::BBox;
use vehicle_count::{
    Canvas, Color, Control, Detection, Detector, Display, Error, Frame, FrameSink, FrameSource, Result, Track,
    Tracker, VehicleClass, VideoProperties,
};

pub const WIDTH: i32 = 640;
pub const HEIGHT: i32 = 480;

/// Stand-in for a decoded frame: remembers every text drawn on it.
#[derive(Debug, Clone, Default)]
pub struct FakeImage {
    pub position: u64,
    pub texts: Vec<String>,
    pub rects: usize,
    pub lines: usize,
}

impl FakeImage {
    pub fn shows(&self, text: &str) -> bool {
        self.texts.iter().any(|t| t == text)
    }
}

impl Canvas for FakeImage {
    fn width(&self) -> i32 {
        WIDTH
    }

    fn draw_rect(&mut self, _: (i32, i32), _: (i32, i32), _: Color, _: i32) -> Result<()> {
        self.rects += 1;
        Ok(())
    }

    fn draw_line(&mut self, _: (i32, i32), _: (i32, i32), _: Color, _: i32) -> Result<()> {
        self.lines += 1;
        Ok(())
    }

    fn draw_text(&mut self, text: &str, _: (i32, i32), _: f64, _: Color, _: i32) -> Result<()> {
        self.texts.push(text.to_string());
        Ok(())
    }
}

/// Shared view on what happened to the source and sink after the pipeline
/// consumed them.
#[derive(Debug, Default)]
pub struct Journal {
    pub frames_read: u64,
    pub source_released: bool,
    pub sink_released: bool,
    pub written: Vec<FakeImage>,
}

pub type SharedJournal = Rc<RefCell<Journal>>;

pub fn journal() -> SharedJournal {
    Rc::new(RefCell::new(Journal::default()))
}

pub struct ScriptedSource {
    frames: u64,
    fail_at: Option<u64>,
    journal: SharedJournal,
}

impl ScriptedSource {
    pub fn new(frames: u64, journal: &SharedJournal) -> Self {
        Self {
            frames,
            fail_at: None,
            journal: journal.clone(),
        }
    }

    /// Reading frame `position` (1-based) reports a decode error.
    pub fn failing_at(mut self, position: u64) -> Self {
        self.fail_at = Some(position);
        self
    }
}

impl FrameSource for ScriptedSource {
    type Image = FakeImage;

    fn properties(&self) -> VideoProperties {
        VideoProperties {
            width: WIDTH,
            height: HEIGHT,
            fps: 25.0,
        }
    }

    fn read(&mut self) -> Result<Option<FakeImage>> {
        let mut journal = self.journal.borrow_mut();
        let position = journal.frames_read + 1;

        if self.fail_at == Some(position) {
            return Err(Error::Model("corrupt packet".into()));
        }

        if position > self.frames {
            return Ok(None);
        }

        journal.frames_read = position;
        Ok(Some(FakeImage {
            position,
            ..FakeImage::default()
        }))
    }

    fn release(&mut self) -> Result<()> {
        self.journal.borrow_mut().source_released = true;
        Ok(())
    }
}

pub struct RecordingSink {
    journal: SharedJournal,
    fail_release: bool,
}

impl RecordingSink {
    pub fn new(journal: &SharedJournal) -> Self {
        Self {
            journal: journal.clone(),
            fail_release: false,
        }
    }

    /// Closing the output reports an error, after marking the sink released.
    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }
}

impl FrameSink<FakeImage> for RecordingSink {
    fn write(&mut self, image: &FakeImage) -> Result<()> {
        self.journal.borrow_mut().written.push(image.clone());
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.journal.borrow_mut().sink_released = true;

        if self.fail_release {
            return Err(Error::Output {
                path: "clip_processed.mp4".into(),
                reason: "disk full".into(),
            });
        }

        Ok(())
    }
}

/// Emits one detection per frame, or fails on a chosen frame.
pub struct ScriptedDetector {
    pub fail_at: Option<u64>,
}

impl Detector<FakeImage> for ScriptedDetector {
    fn detect(&mut self, frame: &Frame<FakeImage>) -> Result<Vec<Detection>> {
        if self.fail_at == Some(frame.index) {
            return Err(Error::Model("inference failed".into()));
        }

        Ok(vec![Detection {
            bbox: BBox::ltwh(100.0, 100.0, 50.0, 40.0),
            score: 0.9,
            class: VehicleClass::Car,
        }])
    }
}

/// Replays tracks keyed by frame position. A track is given as
/// `(id, center y, confirmed)`.
#[derive(Default)]
pub struct ScriptedTracker {
    script: HashMap<u64, Vec<(u64, f32, bool)>>,
    fail_at: Option<u64>,
}

impl ScriptedTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, position: u64, tracks: &[(u64, f32, bool)]) -> Self {
        self.script.insert(position, tracks.to_vec());
        self
    }

    /// Updating on frame `position` reports a tracker error.
    pub fn failing_at(mut self, position: u64) -> Self {
        self.fail_at = Some(position);
        self
    }

    pub fn span(mut self, positions: std::ops::RangeInclusive<u64>, tracks: &[(u64, f32, bool)]) -> Self {
        for position in positions {
            self.script.insert(position, tracks.to_vec());
        }
        self
    }
}

impl Tracker<FakeImage> for ScriptedTracker {
    fn update(&mut self, _: &[Detection], frame: &Frame<FakeImage>) -> Result<Vec<Track>> {
        if self.fail_at == Some(frame.index) {
            return Err(Error::Tracker("assignment failed".into()));
        }

        Ok(self
            .script
            .get(&frame.index)
            .map(|tracks| {
                tracks
                    .iter()
                    .map(|&(id, cy, confirmed)| {
                        Track::new(id, BBox::ltrb(100.0, cy - 20.0, 160.0, cy + 20.0), confirmed)
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Asks to quit once frame `position` has been shown.
pub struct QuitAfter {
    pub position: u64,
}

impl Display<FakeImage> for QuitAfter {
    fn show(&mut self, image: &FakeImage) -> Result<Control> {
        if image.position >= self.position {
            Ok(Control::Quit)
        } else {
            Ok(Control::Continue)
        }
    }
}
