//! The linear-time compiler: unrolled steps in, absolute timetable out.
//!
//! Walking the flat step list behind a nominal clock, the compiler builds
//! two things. First, a global set of *breakpoints*: every absolute time at
//! which any line may change state, including the start of every step and
//! the final time (the terminal breakpoint). Second, a per-device *on-time
//! set*: the breakpoints at which that line is asserted high. A line is ON
//! throughout `[t, t_next)` exactly when `t` sits in its on-time set,
//! `t_next` being the next global breakpoint. Devices without an address
//! never appear in the timetable.
//!
//! Turn-on delays are honoured by commanding lines early. A device newly
//! active in a step starting at `t` is stamped from `t - delay` through
//! every breakpoint up to `t`, so its pre-trigger window cannot be broken
//! by edges that already exist. When the early command lands strictly
//! inside an existing interval it splits that interval, and every line on
//! through it inherits the new time so nothing flickers off. Within one
//! step, larger delays are processed first: the breakpoints they plant are
//! what the shorter-delay splits must propagate across.
//!
//! A device listed in consecutive steps is *not* re-commanded: its pulse
//! ends at the close of the step that triggered it. Re-triggering a line
//! before its previous pulse window has closed is a [`TimingConflict`],
//! because the off-gap cannot absorb the turn-on delay.
//!
//! With wrap-around requested, command times falling before zero are legal
//! and rotated to the tail of the period (see [`wrap`]); without it they
//! are a [`WrapAmbiguity`]. Inverted lines have their on-sets complemented
//! over the breakpoints as the very last pass, so all scheduling logic
//! above thinks in logical (non-inverted) terms.
//!
//! [`TimingConflict`]: crate::errors::SeqError::TimingConflict
//! [`WrapAmbiguity`]: crate::errors::SeqError::WrapAmbiguity
//! [`wrap`]: crate::wrap

use std::collections::BTreeSet;
use std::ops::Bound;

use indexmap::{IndexMap, IndexSet};
use ndarray::{s, Array2};

use crate::device::{Device, Tick};
use crate::errors::{Result, SeqError};
use crate::sequence::Sequence;
use crate::wrap;

/// Compiled timetable: per-device on-time sets over a shared breakpoint set.
#[cfg_attr(feature = "python", pyo3::pyclass)]
#[derive(Clone, Debug, PartialEq)]
pub struct Timeline {
    on_times: IndexMap<Device, BTreeSet<Tick>>,
    breakpoints: BTreeSet<Tick>,
    period: Tick,
}

impl Sequence {
    /// Compiles the sequence into a [`Timeline`]. Runs in one pass over the
    /// steps; the sequence itself is left untouched, and compiling twice
    /// yields identical timetables.
    ///
    /// With `wrap = true`, on-commands reaching before time zero are folded
    /// onto the tail of the period (the generator replays the program
    /// head-to-tail, so the previous pass's tail is where they belong).
    /// With `wrap = false` the same situation is an error.
    pub fn compile_timeline(&self, wrap: bool) -> Result<Timeline> {
        let period = self.period();
        let mut on_times: IndexMap<Device, BTreeSet<Tick>> = self
            .devices()
            .iter()
            .filter(|dev| dev.has_address())
            .map(|dev| (dev.clone(), BTreeSet::new()))
            .collect();
        let mut breakpoints: BTreeSet<Tick> = BTreeSet::new();
        let mut busy_until: IndexMap<Device, Tick> = IndexMap::new();
        let mut prev_devices: IndexSet<Device> = IndexSet::new();
        let mut clock: Tick = 0;

        for (step_index, step) in self.steps().iter().enumerate() {
            // Every step opens at a breakpoint: the off-edge for lines of the
            // previous step and the anchor for lines of this one.
            breakpoints.insert(clock);

            let mut newly_on: Vec<&Device> = step
                .devices()
                .iter()
                .filter(|dev| dev.has_address() && !prev_devices.contains(*dev))
                .collect();
            newly_on.sort_by_key(|dev| std::cmp::Reverse(dev.delay()));

            for dev in newly_on {
                let on_t = clock - dev.delay();
                if let Some(&busy) = busy_until.get(dev) {
                    if on_t < busy {
                        return Err(SeqError::TimingConflict {
                            label: dev.label().to_string(),
                            step_index,
                            commanded: on_t,
                            busy_until: busy,
                        });
                    }
                }
                if on_t < 0 && !wrap {
                    return Err(SeqError::WrapAmbiguity {
                        label: dev.label().to_string(),
                        time: on_t,
                        period,
                    });
                }
                split_insert(&mut on_times, &mut breakpoints, on_t);
                // The pre-trigger window [on_t, clock] must stay covered:
                // stamp the command time and every breakpoint already
                // standing between it and the nominal start.
                let stamps = on_times.get_mut(dev).unwrap();
                stamps.insert(on_t);
                for &bp in breakpoints.range((Bound::Excluded(on_t), Bound::Included(clock))) {
                    stamps.insert(bp);
                }
                busy_until.insert(dev.clone(), clock + step.dur());
            }

            clock += step.dur();
            prev_devices = step.devices().clone();
        }
        breakpoints.insert(clock);

        if wrap {
            wrap::normalize(&mut on_times, &mut breakpoints, period)?;
        }
        apply_polarity(&mut on_times, &breakpoints);

        Ok(Timeline {
            on_times,
            breakpoints,
            period,
        })
    }
}

/// Inserting a time strictly inside an existing interval must not turn off
/// lines running through it: every line stamped at the interval's open end
/// inherits the new time before it becomes a breakpoint.
fn split_insert(
    on_times: &mut IndexMap<Device, BTreeSet<Tick>>,
    breakpoints: &mut BTreeSet<Tick>,
    t: Tick,
) {
    if breakpoints.contains(&t) {
        return;
    }
    if let Some(&before) = breakpoints.range(..t).next_back() {
        for stamps in on_times.values_mut() {
            if stamps.contains(&before) {
                stamps.insert(t);
            }
        }
    }
    breakpoints.insert(t);
}

/// Complements inverted lines over the breakpoint set. The terminal
/// breakpoint opens no interval and is never stamped.
fn apply_polarity(on_times: &mut IndexMap<Device, BTreeSet<Tick>>, breakpoints: &BTreeSet<Tick>) {
    let terminal = breakpoints.iter().next_back().copied();
    for (dev, stamps) in on_times.iter_mut() {
        if !dev.is_inverted() {
            continue;
        }
        let flipped: BTreeSet<Tick> = breakpoints
            .iter()
            .filter(|&&bp| Some(bp) != terminal && !stamps.contains(&bp))
            .copied()
            .collect();
        *stamps = flipped;
    }
}

impl Timeline {
    /// Per-device on-time sets, keyed in device registration order.
    pub fn on_times(&self) -> &IndexMap<Device, BTreeSet<Tick>> {
        &self.on_times
    }

    /// All times at which any line may change state, terminal included.
    pub fn breakpoints(&self) -> &BTreeSet<Tick> {
        &self.breakpoints
    }

    /// Program span in ns. Equals the last breakpoint whenever the sequence
    /// was non-empty.
    pub fn period(&self) -> Tick {
        self.period
    }

    /// The connector bits asserted high throughout the interval opening at
    /// breakpoint `bp`.
    pub fn active_addrs(&self, bp: Tick) -> BTreeSet<u32> {
        self.on_times
            .iter()
            .filter(|(_, stamps)| stamps.contains(&bp))
            .filter_map(|(dev, _)| dev.address())
            .collect()
    }

    /// Labels of the scheduled lines, in row order of [`render`](Self::render).
    pub fn line_labels(&self) -> Vec<&str> {
        self.on_times.keys().map(|dev| dev.label()).collect()
    }

    /// Samples every line's 0/1 state on a uniform `nsamps` grid spanning
    /// `[start, end)`, one row per line. Diagnostics only: the hardware
    /// consumes instruction words, not samples.
    pub fn render(&self, start: Tick, end: Tick, nsamps: usize) -> Array2<f64> {
        assert!(
            !self.on_times.is_empty(),
            "There is no addressed line to render"
        );
        assert!(
            start >= 0 && start < end && end <= self.period,
            "Attempting to render interval {}-{} outside the program period 0-{}",
            start,
            end,
            self.period
        );
        let mut buffer = Array2::from_elem((self.on_times.len(), nsamps), 0.);
        let bps: Vec<Tick> = self.breakpoints.iter().copied().collect();
        // Linear map from time onto sample index: start |-> 0, end |-> nsamps
        let cvt_idx =
            |t: Tick| (((t - start) as f64) / ((end - start) as f64) * (nsamps as f64)) as usize;
        for (row, stamps) in self.on_times.values().enumerate() {
            for w in 0..bps.len().saturating_sub(1) {
                if !stamps.contains(&bps[w]) {
                    continue;
                }
                let lo = bps[w].max(start);
                let hi = bps[w + 1].min(end);
                if lo >= hi {
                    continue;
                }
                let (i0, i1) = (cvt_idx(lo), cvt_idx(hi).min(nsamps));
                buffer.slice_mut(s![row, i0..i1]).fill(1.0);
            }
        }
        buffer
    }
}
