//! Output-line descriptors for the pulse generator.
//!
//! A [`Device`] names one digital line the generator drives: an optional
//! connector address (the bit index on the output bank), a human-readable
//! label, the line's turn-on delay, and its polarity. Devices are plain
//! values with no registry behind them: build them anywhere, clone them
//! freely, pass them into as many steps as you like.
//!
//! Identity is the tuple `(address, delay, inverted)`; the label rides along
//! for messages and dumps only. Two constructions with equal identity fields
//! are the same line as far as the compiler is concerned, even under
//! different labels. Conversely, the same connector registered once with a
//! delay and once without is two distinct schedule entities, which is almost
//! never what an experiment wants.
//!
//! A device without an address is a placeholder ("don't care"): it can sit
//! in steps for bookkeeping but is dropped from every compiled artifact.

use std::fmt;
use std::hash::{Hash, Hasher};

use regex::Regex;

/// Program time in integer nanoseconds.
///
/// Signed, because the compiler transiently schedules on-commands before
/// time zero when a turn-on delay reaches across the loop boundary.
pub type Tick = i64;

/// One digital output line and its electrical personality.
///
/// See the [module docs](self) for the identity rules.
#[cfg_attr(feature = "python", pyo3::pyclass)]
#[derive(Clone, Debug)]
pub struct Device {
    address: Option<u32>,
    label: String,
    delay: Tick,
    inverted: bool,
}

impl Device {
    /// Constructs a device descriptor. `delay_ns` is rounded to the nearest
    /// nanosecond; negative delays are a caller bug and panic.
    ///
    /// # Examples
    /// ```
    /// use seqcompiler_backend::device::*;
    ///
    /// let aom = Device::new(Some(0), "aom", 700.0, false);
    /// assert_eq!(aom.address(), Some(0));
    /// assert_eq!(aom.delay(), 700);
    /// assert!(!aom.is_inverted());
    /// ```
    pub fn new(address: Option<u32>, label: &str, delay_ns: f64, inverted: bool) -> Self {
        assert!(
            delay_ns >= 0.0,
            "Device {} must have a non-negative turn-on delay, got {} ns",
            label,
            delay_ns
        );
        Self {
            address,
            label: label.to_string(),
            delay: delay_ns.round() as Tick,
            inverted,
        }
    }

    /// Constructs a device from a front-panel connector name.
    ///
    /// Connector names follow the generator's panel labels, `ch(number)`,
    /// and the number becomes the address bit.
    ///
    /// # Examples
    /// ```
    /// use seqcompiler_backend::device::*;
    ///
    /// let gate = Device::from_connector("ch2", "counter_gate", 0.0, false);
    /// assert_eq!(gate.address(), Some(2));
    /// ```
    ///
    /// Any other name format panics:
    /// ```should_panic
    /// # use seqcompiler_backend::device::*;
    /// Device::from_connector("line2", "counter_gate", 0.0, false);
    /// ```
    pub fn from_connector(connector: &str, label: &str, delay_ns: f64, inverted: bool) -> Self {
        let re = Regex::new(r"^ch\d+$").unwrap();
        if !re.is_match(connector) {
            panic!(
                "Expecting connectors of format 'ch(number)' yet received {}",
                connector
            );
        }
        let bit = connector[2..].parse::<u32>().unwrap();
        Self::new(Some(bit), label, delay_ns, inverted)
    }

    /// A placeholder line with no output connector. It may appear in steps
    /// (e.g. to mark a software-only event) but never reaches the hardware.
    pub fn unaddressed(label: &str) -> Self {
        Self::new(None, label, 0.0, false)
    }

    pub fn address(&self) -> Option<u32> {
        self.address
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Turn-on delay in ns: how far ahead of the nominal on-time this line
    /// must be commanded high for the physical output to be up on schedule.
    pub fn delay(&self) -> Tick {
        self.delay
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    pub fn has_address(&self) -> bool {
        self.address.is_some()
    }

    fn key(&self) -> (Option<u32>, Tick, bool) {
        (self.address, self.delay, self.inverted)
    }
}

// Identity deliberately excludes the label.
impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(bit) => write!(
                f,
                "{} [ch{}, delay {} ns{}]",
                self.label,
                bit,
                self.delay,
                if self.inverted { ", inverted" } else { "" }
            ),
            None => write!(f, "{} [unaddressed]", self.label),
        }
    }
}
