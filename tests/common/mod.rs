#![allow(dead_code)]

mod fakes;
pub use fakes::*;

pub use vehicle_count::{CountingLine, Pipeline};

/// Counting line through the middle of the fake frames.
pub fn middle_line() -> CountingLine {
    CountingLine::new(HEIGHT / 2, 10)
}
