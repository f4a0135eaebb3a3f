//! Editing-phase containers: steps, loopable subsets, and the flat sequence
//! handed to the compiler.
//!
//! Building a program is a three-stage funnel. A [`Step`] pins a set of
//! devices high for a nominal duration. A [`Subset`] groups steps into a
//! block that repeats `loop_count + 1` times, the natural unit for an
//! averaged measurement shot. A [`Sequence`] is the final, fully unrolled
//! step list that [`compile_timeline`] and [`compile_program`] consume.
//!
//! Aggregation is by value throughout: [`Sequence::add_subset`] freezes a
//! deep copy of the subset, so editing the subset afterwards cannot reach
//! into an already-assembled sequence. Every container maintains the union
//! of devices seen in its steps, because the compiler needs the full roster
//! up front to key its per-line tables.
//!
//! Zero-duration steps are legal and dropped silently on aggregation; they
//! let calling code zero out a scan parameter without restructuring the
//! sequence. Negative durations are rejected right here so the compiler
//! never sees one.
//!
//! [`compile_timeline`]: Sequence::compile_timeline
//! [`compile_program`]: Sequence::compile_program

use indexmap::IndexSet;

use crate::device::{Device, Tick};
use crate::errors::{Result, SeqError};

/// One interval of the program: hold exactly `devices` on for `dur` ns.
///
/// # Examples
/// ```
/// use seqcompiler_backend::*;
///
/// let aom = Device::from_connector("ch0", "aom", 700.0, false);
/// let step = Step::new(3000.0, vec![aom]).unwrap();
/// assert_eq!(step.dur(), 3000);
///
/// assert!(Step::new(-1.0, vec![]).is_err());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    dur: Tick,
    devices: IndexSet<Device>,
}

impl Step {
    /// `dur_ns` is rounded to the nearest nanosecond. Duplicate devices (by
    /// identity) collapse to one entry.
    pub fn new(dur_ns: f64, devices: Vec<Device>) -> Result<Self> {
        if !(dur_ns >= 0.0) {
            return Err(SeqError::InvalidStep { dur_ns });
        }
        Ok(Self {
            dur: dur_ns.round() as Tick,
            devices: devices.into_iter().collect(),
        })
    }

    pub fn dur(&self) -> Tick {
        self.dur
    }

    pub fn devices(&self) -> &IndexSet<Device> {
        &self.devices
    }
}

/// A block of steps replayed `loop_count + 1` times when aggregated.
///
/// `loop_count` counts *extra* passes: a subset with `loop_count == 0` runs
/// once. The device union is maintained incrementally as steps arrive.
#[cfg_attr(feature = "python", pyo3::pyclass)]
#[derive(Clone, Debug)]
pub struct Subset {
    steps: Vec<Step>,
    loop_count: u32,
    devices: IndexSet<Device>,
}

impl Subset {
    pub fn new(loop_count: u32) -> Self {
        Self {
            steps: Vec::new(),
            loop_count,
            devices: IndexSet::new(),
        }
    }

    /// Appends a step. Zero-duration steps are dropped silently.
    pub fn add_step(&mut self, step: Step) {
        if step.dur() == 0 {
            return;
        }
        for dev in step.devices() {
            self.devices.insert(dev.clone());
        }
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    /// Number of passes the subset contributes when aggregated.
    pub fn reps(&self) -> u32 {
        self.loop_count + 1
    }

    pub fn devices(&self) -> &IndexSet<Device> {
        &self.devices
    }

    /// Total span in ns, repetitions included.
    pub fn period(&self) -> Tick {
        self.steps.iter().map(Step::dur).sum::<Tick>() * self.reps() as Tick
    }
}

/// The flat, fully unrolled program description the compiler consumes.
///
/// # Examples
/// ```
/// use seqcompiler_backend::*;
///
/// let aom = Device::from_connector("ch0", "aom", 0.0, false);
///
/// let mut shot = Subset::new(1); // two passes
/// shot.add_step(Step::new(100.0, vec![aom.clone()]).unwrap());
/// shot.add_step(Step::new(50.0, vec![]).unwrap());
///
/// let mut seq = Sequence::new();
/// seq.add_subset(&shot);
/// assert_eq!(seq.steps().len(), 4);
/// assert_eq!(seq.period(), 300);
/// ```
#[cfg_attr(feature = "python", pyo3::pyclass)]
#[derive(Clone, Debug)]
pub struct Sequence {
    steps: Vec<Step>,
    devices: IndexSet<Device>,
}

impl Sequence {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            devices: IndexSet::new(),
        }
    }

    /// Appends a single step. Zero-duration steps are dropped silently.
    pub fn add_step(&mut self, step: Step) {
        if step.dur() == 0 {
            return;
        }
        for dev in step.devices() {
            self.devices.insert(dev.clone());
        }
        self.steps.push(step);
    }

    /// Freezes a copy of `subset` into the sequence, its `loop_count + 1`
    /// passes unrolled inline. The caller keeps ownership and may go on
    /// mutating its subset without touching this sequence.
    pub fn add_subset(&mut self, subset: &Subset) {
        for _ in 0..subset.reps() {
            for step in subset.steps() {
                self.steps.push(step.clone());
            }
        }
        for dev in subset.devices() {
            self.devices.insert(dev.clone());
        }
    }

    /// Absorbs another fully built sequence by appending its steps. No
    /// re-unrolling happens; `other` is left untouched.
    pub fn extend(&mut self, other: &Sequence) {
        for step in other.steps() {
            self.steps.push(step.clone());
        }
        for dev in other.devices() {
            self.devices.insert(dev.clone());
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Union of every device mentioned in any aggregated step, in first-seen
    /// order. Placeholder (unaddressed) devices are included here; the
    /// compiler excludes them from its output.
    pub fn devices(&self) -> &IndexSet<Device> {
        &self.devices
    }

    /// Nominal program span in ns: the sum of all step durations.
    pub fn period(&self) -> Tick {
        self.steps.iter().map(Step::dur).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod test {
    use crate::device::Device;
    use crate::errors::SeqError;
    use crate::sequence::*;

    fn aom() -> Device {
        Device::from_connector("ch0", "aom", 700.0, false)
    }

    fn gate() -> Device {
        Device::from_connector("ch2", "counter_gate", 0.0, false)
    }

    #[test]
    fn negative_duration_rejected() {
        let err = Step::new(-10.0, vec![aom()]).unwrap_err();
        assert_eq!(err, SeqError::InvalidStep { dur_ns: -10.0 });
    }

    #[test]
    fn nan_duration_rejected() {
        assert!(Step::new(f64::NAN, vec![]).is_err());
    }

    #[test]
    fn duplicate_devices_collapse() {
        let step = Step::new(100.0, vec![aom(), aom()]).unwrap();
        assert_eq!(step.devices().len(), 1);
    }

    #[test]
    fn zero_duration_steps_dropped() {
        let mut subset = Subset::new(0);
        subset.add_step(Step::new(0.0, vec![aom()]).unwrap());
        subset.add_step(Step::new(100.0, vec![gate()]).unwrap());
        assert_eq!(subset.steps().len(), 1);
        // The dropped step's devices never make it into the union.
        assert!(!subset.devices().contains(&aom()));

        let mut seq = Sequence::new();
        seq.add_step(Step::new(0.0, vec![aom()]).unwrap());
        assert!(seq.is_empty());
    }

    #[test]
    fn subset_unrolls_on_aggregation() {
        let mut subset = Subset::new(2);
        subset.add_step(Step::new(100.0, vec![aom()]).unwrap());
        subset.add_step(Step::new(50.0, vec![]).unwrap());
        assert_eq!(subset.reps(), 3);
        assert_eq!(subset.period(), 450);

        let mut seq = Sequence::new();
        seq.add_subset(&subset);
        assert_eq!(seq.steps().len(), 6);
        assert_eq!(seq.period(), 450);
        assert!(seq.devices().contains(&aom()));
    }

    #[test]
    fn aggregation_freezes_a_copy() {
        let mut subset = Subset::new(0);
        subset.add_step(Step::new(100.0, vec![aom()]).unwrap());

        let mut seq = Sequence::new();
        seq.add_subset(&subset);

        // Later edits to the subset must not leak into the sequence.
        subset.add_step(Step::new(100.0, vec![gate()]).unwrap());
        assert_eq!(seq.steps().len(), 1);
        assert!(!seq.devices().contains(&gate()));
    }

    #[test]
    fn extend_appends_and_unions() {
        let mut head = Sequence::new();
        head.add_step(Step::new(100.0, vec![aom()]).unwrap());

        let mut tail = Sequence::new();
        tail.add_step(Step::new(200.0, vec![gate()]).unwrap());

        head.extend(&tail);
        assert_eq!(head.steps().len(), 2);
        assert_eq!(head.period(), 300);
        assert!(head.devices().contains(&aom()));
        assert!(head.devices().contains(&gate()));
        // Source sequence untouched.
        assert_eq!(tail.steps().len(), 1);
    }

    #[test]
    fn device_union_keeps_first_seen_order() {
        let mut seq = Sequence::new();
        seq.add_step(Step::new(100.0, vec![gate()]).unwrap());
        seq.add_step(Step::new(100.0, vec![aom(), gate()]).unwrap());
        let labels: Vec<&str> = seq.devices().iter().map(|d| d.label()).collect();
        assert_eq!(labels, vec!["counter_gate", "aom"]);
    }
}
