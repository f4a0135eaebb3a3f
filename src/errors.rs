//! Compile-failure taxonomy.
//!
//! Every failure here is deterministic and caused by the sequence itself,
//! so all of them surface synchronously from the compile entry points;
//! nothing is retried or downgraded. Programmer misuse (malformed connector
//! names, negative delays) panics instead, it never reaches this enum.

use thiserror::Error;

use crate::device::Tick;

pub type Result<T> = std::result::Result<T, SeqError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeqError {
    /// Negative (or non-finite) step duration, rejected at [`Step`] construction.
    ///
    /// [`Step`]: crate::sequence::Step
    #[error("invalid step duration {dur_ns} ns: steps cannot run backwards in time")]
    InvalidStep { dur_ns: f64 },

    /// A line is commanded on again before the off-gap since its previous
    /// pulse could absorb its own turn-on delay.
    #[error(
        "timing conflict at step {step_index}: line '{label}' needs its on-command at \
        {commanded} ns but its previous pulse occupies it until {busy_until} ns \
        (off-gap shorter than the turn-on delay)"
    )]
    TimingConflict {
        label: String,
        step_index: usize,
        commanded: Tick,
        busy_until: Tick,
    },

    /// A turn-on command falls before time zero and cannot be scheduled:
    /// either wrap-around was not requested, or the delay spans the whole
    /// program period and wrapping it is meaningless.
    #[error(
        "line '{label}' needs its on-command at {time} ns, which a {period} ns \
        looped program cannot schedule"
    )]
    WrapAmbiguity {
        label: String,
        time: Tick,
        period: Tick,
    },

    /// The folded program still does not fit the generator's instruction memory.
    #[error("pulse program needs {required} instruction words but the generator memory holds {capacity}")]
    Capacity { required: usize, capacity: usize },
}
