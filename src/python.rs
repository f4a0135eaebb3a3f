//! Python bindings for the lab's measurement scripts.
//!
//! The module mirrors the Rust surface one-to-one: build [`Device`] values,
//! pour [`Step`]s into [`Subset`]s and [`Sequence`]s, then call
//! `compile_timeline` / `compile_program`. Compile failures arrive as the
//! dedicated exception types registered below, one per [`SeqError`]
//! variant, so scripts can catch exactly the failure they can handle.
//!
//! Durations and delays cross the boundary as float nanoseconds and are
//! rounded on entry, matching the Rust constructors.

use std::collections::HashMap;

use numpy;
use pyo3::create_exception;
use pyo3::exceptions::PyException;
use pyo3::prelude::*;

use crate::device::Device;
use crate::errors::SeqError;
use crate::program::{PulseInstr, PulseProgram};
use crate::sequence::{Sequence, Step, Subset};
use crate::timeline::Timeline;

create_exception!(seqcompiler_backend, InvalidStepError, PyException);
create_exception!(seqcompiler_backend, TimingConflictError, PyException);
create_exception!(seqcompiler_backend, WrapAmbiguityError, PyException);
create_exception!(seqcompiler_backend, CapacityError, PyException);

impl From<SeqError> for PyErr {
    fn from(err: SeqError) -> PyErr {
        let msg = err.to_string();
        match err {
            SeqError::InvalidStep { .. } => InvalidStepError::new_err(msg),
            SeqError::TimingConflict { .. } => TimingConflictError::new_err(msg),
            SeqError::WrapAmbiguity { .. } => WrapAmbiguityError::new_err(msg),
            SeqError::Capacity { .. } => CapacityError::new_err(msg),
        }
    }
}

#[pymethods]
impl Device {
    /// `Device(connector, label, delay_ns, inverted)`; pass `None` as the
    /// connector for a placeholder line.
    #[new]
    #[pyo3(signature = (connector, label, delay_ns, inverted))]
    fn py_new(connector: Option<&str>, label: &str, delay_ns: f64, inverted: bool) -> Self {
        match connector {
            Some(connector) => Device::from_connector(connector, label, delay_ns, inverted),
            None => Device::new(None, label, delay_ns, inverted),
        }
    }

    #[pyo3(name = "label")]
    fn py_label(&self) -> String {
        self.label().to_string()
    }

    #[pyo3(name = "address")]
    fn py_address(&self) -> Option<u32> {
        self.address()
    }

    #[pyo3(name = "delay_ns")]
    fn py_delay_ns(&self) -> i64 {
        self.delay()
    }

    #[pyo3(name = "is_inverted")]
    fn py_is_inverted(&self) -> bool {
        self.is_inverted()
    }

    fn __repr__(&self) -> String {
        format!("{}", self)
    }
}

#[pymethods]
impl Subset {
    #[new]
    fn py_new(loop_count: u32) -> Self {
        Subset::new(loop_count)
    }

    #[pyo3(name = "add_step")]
    fn py_add_step(&mut self, dur_ns: f64, devices: Vec<Device>) -> PyResult<()> {
        let step = Step::new(dur_ns, devices)?;
        self.add_step(step);
        Ok(())
    }

    #[pyo3(name = "loop_count")]
    fn py_loop_count(&self) -> u32 {
        self.loop_count()
    }

    #[pyo3(name = "period_ns")]
    fn py_period_ns(&self) -> i64 {
        self.period()
    }
}

#[pymethods]
impl Sequence {
    #[new]
    fn py_new() -> Self {
        Sequence::new()
    }

    #[pyo3(name = "add_step")]
    fn py_add_step(&mut self, dur_ns: f64, devices: Vec<Device>) -> PyResult<()> {
        let step = Step::new(dur_ns, devices)?;
        self.add_step(step);
        Ok(())
    }

    /// Freezes a copy of the subset; the Python-side object stays editable.
    #[pyo3(name = "add_subset")]
    fn py_add_subset(&mut self, subset: Subset) {
        self.add_subset(&subset);
    }

    #[pyo3(name = "extend")]
    fn py_extend(&mut self, other: Sequence) {
        self.extend(&other);
    }

    #[pyo3(name = "period_ns")]
    fn py_period_ns(&self) -> i64 {
        self.period()
    }

    #[pyo3(name = "compile_timeline")]
    fn py_compile_timeline(&self, wrap: bool) -> PyResult<Timeline> {
        Ok(self.compile_timeline(wrap)?)
    }

    #[pyo3(name = "compile_program")]
    fn py_compile_program(
        &self,
        wrap: bool,
        fold_loops: bool,
        max_step_ns: Option<f64>,
        capacity: Option<usize>,
    ) -> PyResult<PulseProgram> {
        Ok(self.compile_program(wrap, fold_loops, max_step_ns, capacity)?)
    }
}

#[pymethods]
impl Timeline {
    #[pyo3(name = "breakpoints")]
    fn py_breakpoints(&self) -> Vec<i64> {
        self.breakpoints().iter().copied().collect()
    }

    /// On-time sets keyed by device label.
    #[pyo3(name = "on_times")]
    fn py_on_times(&self) -> HashMap<String, Vec<i64>> {
        self.on_times()
            .iter()
            .map(|(dev, stamps)| (dev.label().to_string(), stamps.iter().copied().collect()))
            .collect()
    }

    #[pyo3(name = "period_ns")]
    fn py_period_ns(&self) -> i64 {
        self.period()
    }

    #[pyo3(name = "line_labels")]
    fn py_line_labels(&self) -> Vec<String> {
        self.line_labels().iter().map(|s| s.to_string()).collect()
    }

    /// Samples the 0/1 state of every line on a uniform grid; returns a 2D
    /// array with one row per line, in `line_labels` order.
    fn calc_signal(
        &self,
        start_ns: f64,
        end_ns: f64,
        nsamps: usize,
        py: Python,
    ) -> PyResult<PyObject> {
        let arr = self.render(start_ns.round() as i64, end_ns.round() as i64, nsamps);
        Ok(numpy::PyArray::from_array(py, &arr).to_object(py))
    }
}

#[pymethods]
impl PulseProgram {
    #[pyo3(name = "word_count")]
    fn py_word_count(&self) -> usize {
        self.word_count()
    }

    #[pyo3(name = "total_dur_ns")]
    fn py_total_dur_ns(&self) -> i64 {
        self.total_dur()
    }

    #[pyo3(name = "period_ns")]
    fn py_period_ns(&self) -> i64 {
        self.period()
    }

    /// Flat `(duration_ns, [address, ...])` pairs with repeats unrolled.
    fn flat(&self) -> Vec<(i64, Vec<u32>)> {
        self.flatten()
            .into_iter()
            .map(|event| (event.dur, event.active.iter().copied().collect()))
            .collect()
    }

    /// Folded view: `(repeat_count, [(duration_ns, [address, ...]), ...])`
    /// per entry; plain words come back with a count of 1.
    fn folded(&self) -> Vec<(usize, Vec<(i64, Vec<u32>)>)> {
        self.instrs()
            .iter()
            .map(|instr| match instr {
                PulseInstr::Run(event) => (
                    1,
                    vec![(event.dur, event.active.iter().copied().collect())],
                ),
                PulseInstr::Repeat { count, body } => (
                    *count,
                    body.iter()
                        .map(|event| (event.dur, event.active.iter().copied().collect()))
                        .collect(),
                ),
            })
            .collect()
    }

    fn __str__(&self) -> String {
        format!("{}", self)
    }

    fn __len__(&self) -> usize {
        self.instrs().len()
    }
}

#[pymodule]
fn seqcompiler_backend(py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<Device>()?;
    m.add_class::<Subset>()?;
    m.add_class::<Sequence>()?;
    m.add_class::<Timeline>()?;
    m.add_class::<PulseProgram>()?;
    m.add("InvalidStepError", py.get_type::<InvalidStepError>())?;
    m.add("TimingConflictError", py.get_type::<TimingConflictError>())?;
    m.add("WrapAmbiguityError", py.get_type::<WrapAmbiguityError>())?;
    m.add("CapacityError", py.get_type::<CapacityError>())?;
    Ok(())
}
