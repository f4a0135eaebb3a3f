//! Instruction emission: timetable in, generator words out.
//!
//! The compiled [`Timeline`] is an analysis artifact; pulse generators want
//! an ordered word list. Emission walks consecutive breakpoint pairs and
//! produces one [`PulseEvent`] per interval: hold this address set for this
//! many nanoseconds. On top of that sit the three memory-oriented passes,
//! in order:
//!
//! 1. *Long-step splitting* (optional): events exceeding the generator's
//!    per-word duration field are cut into `max` -sized words with the
//!    remainder emitted first, so the odd-sized fragment sits at a block
//!    boundary rather than in the middle of a run of equal words.
//! 2. *Loop folding* (optional): a maximal run of a repeated contiguous
//!    block becomes one [`PulseInstr::Repeat`], which stores its body once.
//! 3. *Capacity check* (optional): the folded program must fit the
//!    generator's instruction memory or compilation fails.

use std::collections::BTreeSet;
use std::fmt;

use crate::device::Tick;
use crate::errors::{Result, SeqError};
use crate::sequence::Sequence;
use crate::timeline::Timeline;

/// One generator word: hold exactly the `active` connector bits high for
/// `dur` ns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PulseEvent {
    pub dur: Tick,
    pub active: BTreeSet<u32>,
}

impl PulseEvent {
    pub fn new(dur: Tick, active: BTreeSet<u32>) -> Self {
        Self { dur, active }
    }
}

impl fmt::Display for PulseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits = self
            .active
            .iter()
            .map(|bit| format!("ch{}", bit))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "[{} ns, {{{}}}]", self.dur, bits)
    }
}

/// A program entry: a single word, or a stored block replayed `count` times.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PulseInstr {
    Run(PulseEvent),
    Repeat { count: usize, body: Vec<PulseEvent> },
}

impl PulseInstr {
    /// Instruction-memory cost. A repeat block stores its body once; the
    /// loop control rides on the block's first and last words.
    pub fn word_count(&self) -> usize {
        match self {
            PulseInstr::Run(_) => 1,
            PulseInstr::Repeat { body, .. } => body.len(),
        }
    }

    /// Replay span in ns, repetitions included.
    pub fn dur(&self) -> Tick {
        match self {
            PulseInstr::Run(event) => event.dur,
            PulseInstr::Repeat { count, body } => {
                *count as Tick * body.iter().map(|event| event.dur).sum::<Tick>()
            }
        }
    }
}

/// An ordered, hardware-ready instruction list plus the period it spans.
///
/// Obtained from [`Sequence::compile_program`] or, when a [`Timeline`] is
/// already at hand, from [`PulseProgram::from_timeline`]. The [`Display`]
/// impl is the human-readable dump used in logs and dry runs.
///
/// [`Display`]: fmt::Display
#[cfg_attr(feature = "python", pyo3::pyclass)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PulseProgram {
    instrs: Vec<PulseInstr>,
    period: Tick,
}

impl Sequence {
    /// Full pipeline: timeline compilation, emission, optional long-word
    /// splitting, optional loop folding, optional memory bound.
    ///
    /// `max_step_ns` bounds the duration any single word may carry (the
    /// remainder fragment is emitted first). `capacity` is the generator's
    /// instruction-memory size in words; exceeding it is a
    /// [`SeqError::Capacity`].
    pub fn compile_program(
        &self,
        wrap: bool,
        fold_loops: bool,
        max_step_ns: Option<f64>,
        capacity: Option<usize>,
    ) -> Result<PulseProgram> {
        let timeline = self.compile_timeline(wrap)?;
        PulseProgram::from_timeline(&timeline, fold_loops, max_step_ns, capacity)
    }
}

impl PulseProgram {
    /// Emits instruction words from an already compiled timetable. See
    /// [`Sequence::compile_program`] for the parameters.
    pub fn from_timeline(
        timeline: &Timeline,
        fold_loops: bool,
        max_step_ns: Option<f64>,
        capacity: Option<usize>,
    ) -> Result<Self> {
        let mut events = emit_events(timeline);
        if let Some(max_ns) = max_step_ns {
            let max_dur = max_ns.round() as Tick;
            assert!(
                max_dur > 0,
                "max_step_ns must round to at least 1 ns, got {} ns",
                max_ns
            );
            events = split_long(events, max_dur);
        }
        let instrs = if fold_loops {
            fold_events(&events)
        } else {
            events.into_iter().map(PulseInstr::Run).collect()
        };
        let program = PulseProgram {
            instrs,
            period: timeline.period(),
        };
        if let Some(cap) = capacity {
            let words = program.word_count();
            if words > cap {
                return Err(SeqError::Capacity {
                    required: words,
                    capacity: cap,
                });
            }
        }
        Ok(program)
    }

    pub fn instrs(&self) -> &[PulseInstr] {
        &self.instrs
    }

    /// Instruction-memory footprint in words.
    pub fn word_count(&self) -> usize {
        self.instrs.iter().map(PulseInstr::word_count).sum()
    }

    /// Replay span in ns. Always equals the compiled period: emission
    /// neither creates nor destroys time.
    pub fn total_dur(&self) -> Tick {
        self.instrs.iter().map(PulseInstr::dur).sum()
    }

    pub fn period(&self) -> Tick {
        self.period
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// The event list with every repeat block unrolled.
    pub fn flatten(&self) -> Vec<PulseEvent> {
        let mut flat = Vec::new();
        for instr in &self.instrs {
            match instr {
                PulseInstr::Run(event) => flat.push(event.clone()),
                PulseInstr::Repeat { count, body } => {
                    for _ in 0..*count {
                        flat.extend(body.iter().cloned());
                    }
                }
            }
        }
        flat
    }
}

impl fmt::Display for PulseProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "pulse program: {} entries, {} words, {} ns per pass",
            self.instrs.len(),
            self.word_count(),
            self.total_dur()
        )?;
        for (idx, instr) in self.instrs.iter().enumerate() {
            match instr {
                PulseInstr::Run(event) => writeln!(f, "{:>4}  {}", idx, event)?,
                PulseInstr::Repeat { count, body } => {
                    writeln!(f, "{:>4}  repeat x{}", idx, count)?;
                    for event in body {
                        writeln!(f, "      {}", event)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// One event per consecutive breakpoint pair, active set read off the
/// opening breakpoint.
fn emit_events(timeline: &Timeline) -> Vec<PulseEvent> {
    let bps: Vec<Tick> = timeline.breakpoints().iter().copied().collect();
    let mut events = Vec::with_capacity(bps.len().saturating_sub(1));
    for w in 0..bps.len().saturating_sub(1) {
        events.push(PulseEvent::new(
            bps[w + 1] - bps[w],
            timeline.active_addrs(bps[w]),
        ));
    }
    events
}

/// Cuts every over-long event into `max_dur`-sized words, remainder first.
fn split_long(events: Vec<PulseEvent>, max_dur: Tick) -> Vec<PulseEvent> {
    let mut out = Vec::with_capacity(events.len());
    for event in events {
        if event.dur <= max_dur {
            out.push(event);
            continue;
        }
        let whole = event.dur / max_dur;
        let rem = event.dur % max_dur;
        if rem > 0 {
            out.push(PulseEvent::new(rem, event.active.clone()));
        }
        for _ in 0..whole {
            out.push(PulseEvent::new(max_dur, event.active.clone()));
        }
    }
    out
}

/// Greedy folding pass. At each position the repeated contiguous block
/// covering the most words wins (ties to the shorter block); positions
/// without any immediate repetition emit a plain word.
fn fold_events(events: &[PulseEvent]) -> Vec<PulseInstr> {
    let n = events.len();
    let mut out = Vec::new();
    let mut i = 0;
    while i < n {
        let mut best_len = 0;
        let mut best_reps = 0;
        for len in 1..=(n - i) / 2 {
            if events[i..i + len] != events[i + len..i + 2 * len] {
                continue;
            }
            let mut reps = 2;
            while i + (reps + 1) * len <= n
                && events[i..i + len] == events[i + reps * len..i + (reps + 1) * len]
            {
                reps += 1;
            }
            if reps * len > best_reps * best_len {
                best_len = len;
                best_reps = reps;
            }
        }
        if best_reps >= 2 {
            out.push(PulseInstr::Repeat {
                count: best_reps,
                body: events[i..i + best_len].to_vec(),
            });
            i += best_reps * best_len;
        } else {
            out.push(PulseInstr::Run(events[i].clone()));
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod test {
    use crate::device::Device;
    use crate::errors::SeqError;
    use crate::program::*;
    use crate::sequence::{Sequence, Step, Subset};

    fn ev(dur: Tick, bits: &[u32]) -> PulseEvent {
        PulseEvent::new(dur, bits.iter().copied().collect())
    }

    fn two_line_sequence() -> Sequence {
        let a = Device::from_connector("ch0", "a", 0.0, false);
        let b = Device::from_connector("ch1", "b", 10.0, false);
        let mut seq = Sequence::new();
        seq.add_step(Step::new(100.0, vec![a.clone()]).unwrap());
        seq.add_step(Step::new(100.0, vec![a, b]).unwrap());
        seq.add_step(Step::new(100.0, vec![]).unwrap());
        seq
    }

    #[test]
    fn emits_one_word_per_interval() {
        let program = two_line_sequence()
            .compile_program(false, false, None, None)
            .unwrap();
        assert_eq!(
            program.flatten(),
            vec![
                ev(90, &[0]),
                ev(10, &[0, 1]),
                ev(100, &[1]),
                ev(100, &[]),
            ]
        );
        assert_eq!(program.word_count(), 4);
        assert_eq!(program.total_dur(), 300);
        assert_eq!(program.period(), 300);
    }

    #[test]
    fn alternating_pair_folds_to_one_block() {
        let x = Device::from_connector("ch0", "x", 0.0, false);
        let y = Device::from_connector("ch1", "y", 0.0, false);
        let mut shot = Subset::new(4);
        shot.add_step(Step::new(100.0, vec![x]).unwrap());
        shot.add_step(Step::new(200.0, vec![y]).unwrap());
        let mut seq = Sequence::new();
        seq.add_subset(&shot);

        let program = seq.compile_program(false, true, None, None).unwrap();
        assert_eq!(
            program.instrs(),
            &[PulseInstr::Repeat {
                count: 5,
                body: vec![ev(100, &[0]), ev(200, &[1])],
            }]
        );
        assert_eq!(program.word_count(), 2);
        assert_eq!(program.total_dur(), 1500);
    }

    #[test]
    fn capacity_counts_folded_words() {
        let x = Device::from_connector("ch0", "x", 0.0, false);
        let y = Device::from_connector("ch1", "y", 0.0, false);
        let mut shot = Subset::new(4);
        shot.add_step(Step::new(100.0, vec![x]).unwrap());
        shot.add_step(Step::new(200.0, vec![y]).unwrap());
        let mut seq = Sequence::new();
        seq.add_subset(&shot);

        assert!(seq.compile_program(false, true, None, Some(2)).is_ok());
        let err = seq.compile_program(false, true, None, Some(1)).unwrap_err();
        assert_eq!(
            err,
            SeqError::Capacity {
                required: 2,
                capacity: 1,
            }
        );
        // Unfolded, the same sequence needs all ten words.
        let err = seq
            .compile_program(false, false, None, Some(2))
            .unwrap_err();
        assert_eq!(
            err,
            SeqError::Capacity {
                required: 10,
                capacity: 2,
            }
        );
    }

    #[test]
    fn split_puts_remainder_first() {
        let events = split_long(vec![ev(250, &[0]), ev(80, &[1])], 100);
        assert_eq!(
            events,
            vec![ev(50, &[0]), ev(100, &[0]), ev(100, &[0]), ev(80, &[1])]
        );
    }

    #[test]
    fn split_then_fold_compresses_the_run() {
        let a = Device::from_connector("ch0", "a", 0.0, false);
        let mut seq = Sequence::new();
        seq.add_step(Step::new(1050.0, vec![a]).unwrap());

        let program = seq
            .compile_program(false, true, Some(100.0), None)
            .unwrap();
        assert_eq!(
            program.instrs(),
            &[
                PulseInstr::Run(ev(50, &[0])),
                PulseInstr::Repeat {
                    count: 10,
                    body: vec![ev(100, &[0])],
                },
            ]
        );
        assert_eq!(program.word_count(), 2);
        assert_eq!(program.total_dur(), 1050);
    }

    #[test]
    fn fold_prefers_widest_span() {
        // A 4-word block repeated twice beats the 2-word block repeated
        // twice that also starts at position 0.
        let events = vec![
            ev(10, &[0]),
            ev(10, &[1]),
            ev(10, &[0]),
            ev(10, &[1]),
            ev(10, &[2]),
            ev(10, &[0]),
            ev(10, &[1]),
            ev(10, &[0]),
            ev(10, &[1]),
            ev(10, &[2]),
        ];
        let instrs = fold_events(&events);
        assert_eq!(
            instrs,
            vec![PulseInstr::Repeat {
                count: 2,
                body: vec![
                    ev(10, &[0]),
                    ev(10, &[1]),
                    ev(10, &[0]),
                    ev(10, &[1]),
                    ev(10, &[2]),
                ],
            }]
        );
    }

    #[test]
    fn fold_ties_go_to_the_shorter_block() {
        // [w w w w] can fold as 4x1 or 2x2; both span all four words, and
        // the single-word body costs less memory.
        let events = vec![ev(10, &[0]); 4];
        let instrs = fold_events(&events);
        assert_eq!(
            instrs,
            vec![PulseInstr::Repeat {
                count: 4,
                body: vec![ev(10, &[0])],
            }]
        );
    }

    #[test]
    fn folding_preserves_replay() {
        let a = Device::from_connector("ch0", "a", 0.0, false);
        let b = Device::from_connector("ch1", "b", 10.0, false);
        let mut shot = Subset::new(3);
        shot.add_step(Step::new(100.0, vec![a.clone()]).unwrap());
        shot.add_step(Step::new(50.0, vec![b.clone()]).unwrap());
        shot.add_step(Step::new(70.0, vec![]).unwrap());
        let mut seq = Sequence::new();
        seq.add_subset(&shot);

        let folded = seq.compile_program(true, true, None, None).unwrap();
        let plain = seq.compile_program(true, false, None, None).unwrap();
        assert_eq!(folded.flatten(), plain.flatten());
        assert_eq!(folded.total_dur(), plain.total_dur());
        assert!(folded.word_count() < plain.word_count());
    }

    #[test]
    fn empty_sequence_yields_empty_program() {
        let program = Sequence::new()
            .compile_program(false, true, None, Some(16))
            .unwrap();
        assert!(program.is_empty());
        assert_eq!(program.word_count(), 0);
        assert_eq!(program.total_dur(), 0);
    }

    #[test]
    fn dump_shows_repeats_and_words() {
        let x = Device::from_connector("ch0", "x", 0.0, false);
        let y = Device::from_connector("ch1", "y", 0.0, false);
        let mut shot = Subset::new(4);
        shot.add_step(Step::new(100.0, vec![x]).unwrap());
        shot.add_step(Step::new(200.0, vec![y]).unwrap());
        let mut seq = Sequence::new();
        seq.add_subset(&shot);

        let dump = format!("{}", seq.compile_program(false, true, None, None).unwrap());
        assert!(dump.contains("pulse program: 1 entries, 2 words, 1500 ns per pass"));
        assert!(dump.contains("repeat x5"));
        assert!(dump.contains("[100 ns, {ch0}]"));
        assert!(dump.contains("[200 ns, {ch1}]"));
    }
}
