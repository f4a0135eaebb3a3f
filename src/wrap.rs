//! Wrap-around normalization for looped programs.
//!
//! The generator replays the program head-to-tail, so an on-command that the
//! linear walk scheduled before zero really belongs near the end of the
//! previous pass. This pass rotates every negative timestamp forward by one
//! period, keeps each line's state consistent across the inserted edges,
//! purges the negatives, and finally sweeps out breakpoints at which no line
//! changes state any more.

use std::collections::BTreeSet;
use std::ops::Bound;

use indexmap::IndexMap;

use crate::device::{Device, Tick};
use crate::errors::{Result, SeqError};

/// Rewrites `on_times` and `breakpoints` in place so that all timestamps lie
/// in `[0, period]`. Fails when a shifted command still cannot land strictly
/// inside the period, i.e. the turn-on delay swallows a whole program pass.
pub fn normalize(
    on_times: &mut IndexMap<Device, BTreeSet<Tick>>,
    breakpoints: &mut BTreeSet<Tick>,
    period: Tick,
) -> Result<()> {
    let mut shifts: Vec<(Device, Tick)> = Vec::new();
    for (dev, stamps) in on_times.iter() {
        for &t in stamps.range(..0) {
            shifts.push((dev.clone(), t));
        }
    }
    let terminal = breakpoints.iter().next_back().copied().unwrap_or(0);

    for (dev, neg) in shifts {
        let shifted = period + neg;
        if shifted <= 0 {
            return Err(SeqError::WrapAmbiguity {
                label: dev.label().to_string(),
                time: neg,
                period,
            });
        }
        if !breakpoints.contains(&shifted) {
            // The landing interval gets split: lines on through it inherit
            // the new edge so they do not drop out mid-interval.
            if let Some(&before) = breakpoints.range(..shifted).next_back() {
                for stamps in on_times.values_mut() {
                    if stamps.contains(&before) {
                        stamps.insert(shifted);
                    }
                }
            }
            breakpoints.insert(shifted);
        }
        // The shifted pre-trigger window runs from the landing time to the
        // terminal; stamp every breakpoint standing inside it, as the linear
        // walk does for windows that stay on the positive side.
        let stamps = on_times.get_mut(&dev).unwrap();
        stamps.insert(shifted);
        for &bp in breakpoints.range((Bound::Excluded(shifted), Bound::Excluded(terminal))) {
            stamps.insert(bp);
        }
    }

    for stamps in on_times.values_mut() {
        *stamps = stamps.split_off(&0);
    }
    *breakpoints = breakpoints.split_off(&0);

    drop_dead_breakpoints(on_times, breakpoints);
    Ok(())
}

/// Drops interior breakpoints at which no line changes state, removing them
/// from the device sets as well. The program start and the terminal
/// breakpoint always survive.
fn drop_dead_breakpoints(
    on_times: &mut IndexMap<Device, BTreeSet<Tick>>,
    breakpoints: &mut BTreeSet<Tick>,
) {
    let bps: Vec<Tick> = breakpoints.iter().copied().collect();
    if bps.len() < 3 {
        return;
    }
    // `live` tracks the previous surviving breakpoint: the state just before
    // a candidate is the state of the interval that breakpoint opens.
    let mut live = bps[0];
    for &cur in &bps[1..bps.len() - 1] {
        let unchanged = on_times
            .values()
            .all(|stamps| stamps.contains(&live) == stamps.contains(&cur));
        if unchanged {
            breakpoints.remove(&cur);
            for stamps in on_times.values_mut() {
                stamps.remove(&cur);
            }
        } else {
            live = cur;
        }
    }
}
