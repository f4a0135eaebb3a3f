//! The hardware-facing half of the pipeline.
//!
//! Compilation ends at a [`PulseProgram`]; anything that can arm a generator
//! with one implements [`SequenceSink`]. Real backends translate the program
//! into vendor word encodings and drive a driver session; [`TextSink`] is
//! the built-in degenerate backend that writes the human-readable dump,
//! which is what dry runs and log files want.

use std::io::{self, Write};

use crate::program::PulseProgram;

/// Something that can take a finished pulse program and replay it.
///
/// `clock_hz` is the generator's instruction clock; sinks that encode
/// durations in clock cycles divide by it. Loading must not mutate the
/// program, so one compiled program can be handed to several sinks.
pub trait SequenceSink {
    type Error;

    fn load(&mut self, program: &PulseProgram, clock_hz: f64) -> std::result::Result<(), Self::Error>;
}

/// Writes the program dump to any [`Write`] target.
pub struct TextSink<W: Write> {
    out: W,
}

impl<W: Write> TextSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Hands back the underlying writer, e.g. to inspect a buffer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> SequenceSink for TextSink<W> {
    type Error = io::Error;

    fn load(&mut self, program: &PulseProgram, clock_hz: f64) -> io::Result<()> {
        writeln!(self.out, "clock: {} Hz", clock_hz)?;
        write!(self.out, "{}", program)?;
        self.out.flush()
    }
}
