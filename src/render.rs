//! Frame annotation.
//!
//! `render` builds a pure description of what goes on a frame; a `Canvas`
//! paints it onto whatever pixel buffer the backend uses.

use crate::counting::CountingLine;
use crate::error::Result;
use crate::tracking::Track;

/// BGR colour, the channel order OpenCV frames use.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Color {
    pub b: u8,
    pub g: u8,
    pub r: u8,
}

impl Color {
    pub const RED: Color = Color::bgr(0, 0, 255);
    pub const GREEN: Color = Color::bgr(0, 255, 0);
    pub const YELLOW: Color = Color::bgr(0, 255, 255);

    pub const fn bgr(b: u8, g: u8, r: u8) -> Self {
        Self { b, g, r }
    }
}

const BOX_COLOR: Color = Color::RED;
const BOX_THICKNESS: i32 = 2;
const LABEL_OFFSET: i32 = 10;
const LABEL_SCALE: f64 = 0.7;
const LINE_COLOR: Color = Color::GREEN;
const LINE_THICKNESS: i32 = 2;
const TOTAL_ORIGIN: (i32, i32) = (20, 50);
const TOTAL_SCALE: f64 = 1.0;
const TOTAL_COLOR: Color = Color::YELLOW;
const TOTAL_THICKNESS: i32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Rect {
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
        color: Color,
        thickness: i32,
    },
    Line {
        from: (i32, i32),
        to: (i32, i32),
        color: Color,
        thickness: i32,
    },
    /// `origin` is the bottom-left corner of the text.
    Text {
        text: String,
        origin: (i32, i32),
        scale: f64,
        color: Color,
        thickness: i32,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlay {
    pub shapes: Vec<Shape>,
}

impl Overlay {
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.shapes.iter().filter_map(|s| match s {
            Shape::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn paint<C: Canvas + ?Sized>(&self, canvas: &mut C) -> Result<()> {
        for shape in &self.shapes {
            match shape {
                Shape::Rect {
                    left,
                    top,
                    right,
                    bottom,
                    color,
                    thickness,
                } => canvas.draw_rect((*left, *top), (*right, *bottom), *color, *thickness)?,
                Shape::Line {
                    from,
                    to,
                    color,
                    thickness,
                } => canvas.draw_line(*from, *to, *color, *thickness)?,
                Shape::Text {
                    text,
                    origin,
                    scale,
                    color,
                    thickness,
                } => canvas.draw_text(text, *origin, *scale, *color, *thickness)?,
            }
        }

        Ok(())
    }
}

/// A pixel surface shapes can be drawn on.
pub trait Canvas {
    fn width(&self) -> i32;

    fn draw_rect(&mut self, top_left: (i32, i32), bottom_right: (i32, i32), color: Color, thickness: i32) -> Result<()>;

    fn draw_line(&mut self, from: (i32, i32), to: (i32, i32), color: Color, thickness: i32) -> Result<()>;

    fn draw_text(&mut self, text: &str, origin: (i32, i32), scale: f64, color: Color, thickness: i32) -> Result<()>;
}

/// Everything drawn on one frame: a box and `ID: <id>` label per confirmed
/// track, the counting line across the full width, then the running total.
pub fn render(frame_width: i32, tracks: &[Track], line: &CountingLine, total: u64) -> Overlay {
    let mut shapes = Vec::with_capacity(tracks.len() * 2 + 2);

    for track in tracks.iter().filter(|t| t.confirmed) {
        let left = track.bbox.left() as i32;
        let top = track.bbox.top() as i32;

        shapes.push(Shape::Rect {
            left,
            top,
            right: track.bbox.right() as i32,
            bottom: track.bbox.bottom() as i32,
            color: BOX_COLOR,
            thickness: BOX_THICKNESS,
        });

        shapes.push(Shape::Text {
            text: format!("ID: {}", track.id),
            origin: (left, top.saturating_sub(LABEL_OFFSET)),
            scale: LABEL_SCALE,
            color: BOX_COLOR,
            thickness: BOX_THICKNESS,
        });
    }

    shapes.push(Shape::Line {
        from: (0, line.y),
        to: (frame_width, line.y),
        color: LINE_COLOR,
        thickness: LINE_THICKNESS,
    });

    shapes.push(Shape::Text {
        text: format!("Total Vehicles: {}", total),
        origin: TOTAL_ORIGIN,
        scale: TOTAL_SCALE,
        color: TOTAL_COLOR,
        thickness: TOTAL_THICKNESS,
    });

    Overlay { shapes }
}

/// Renders straight onto a canvas.
pub fn annotate<C: Canvas + ?Sized>(
    canvas: &mut C,
    tracks: &[Track],
    line: &CountingLine,
    total: u64,
) -> Result<Overlay> {
    let overlay = render(canvas.width(), tracks, line, total);
    overlay.paint(canvas)?;

    Ok(overlay)
}
