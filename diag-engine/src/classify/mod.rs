//! Bit-flip classification.
//!
//! Compares a received packet against the bytes that were sent and attributes the differences
//! to a likely physical cause. Timing setup violations show up as 1→0 flips, hold violations
//! as 0→1 flips recurring every [`HOLD_INTERVAL`] bytes. Multiple flipped bits within one byte
//! cannot be attributed and make the packet [`FailureType::Unknown`].
//!
//! [`classify`] is a pure function of its inputs.
use std::fmt;

mod hold;
pub use hold::{HOLD_INTERVAL, HOLD_THRESHOLD};

/// Default number of leading bytes treated as header.
pub const DEFAULT_HEADER_LEN: usize = 64;

/// A 1→0 flip in this bit position of a header byte is a strong setup suspect.
pub const STRONG_SETUP_BIT: u32 = 1;

/// Failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureType {
    NoFailure,
    /// Weak setup suspect: 1→0 flip in the header, not in bit 1.
    SSetup,
    /// Strong setup suspect: 1→0 flip of bit 1 in the header.
    SsSetup,
    /// Weak hold suspect: 0→1 flips without a repeating interval.
    SHold,
    /// Strong hold suspect: 0→1 flips on a repeating 80-byte interval.
    SsHold,
    /// 1→0 flips in the payload.
    PayloadSetup,
    /// Setup and hold suspects in the same packet.
    Mixed,
    /// More than one bit flipped within a byte, or the packet length changed.
    Unknown,
}

impl FailureType {
    pub const ALL: [Self; 8] = [
        Self::NoFailure,
        Self::SSetup,
        Self::SsSetup,
        Self::SHold,
        Self::SsHold,
        Self::PayloadSetup,
        Self::Mixed,
        Self::Unknown,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoFailure => "NoFailure",
            Self::SSetup => "S_Setup",
            Self::SsSetup => "SS_Setup",
            Self::SHold => "S_Hold",
            Self::SsHold => "SS_Hold",
            Self::PayloadSetup => "Payload_Setup",
            Self::Mixed => "Mixed",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The raw suspicion flags gathered while scanning a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Suspects {
    pub weak_setup: bool,
    pub strong_setup: bool,
    pub weak_hold: bool,
    pub strong_hold: bool,
    pub payload_setup: bool,
    /// Some byte had more than one bit flipped.
    pub multi_bit: bool,
    /// Sent and received lengths differ.
    pub length_mismatch: bool,
}

impl Suspects {
    fn setup(&self) -> Option<FailureType> {
        if self.payload_setup {
            Some(FailureType::PayloadSetup)
        } else if self.strong_setup {
            Some(FailureType::SsSetup)
        } else if self.weak_setup {
            Some(FailureType::SSetup)
        } else {
            None
        }
    }

    fn hold(&self) -> Option<FailureType> {
        if self.strong_hold {
            Some(FailureType::SsHold)
        } else if self.weak_hold {
            Some(FailureType::SHold)
        } else {
            None
        }
    }
}

/// Outcome of comparing one received packet with the bytes that were sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub bytes_mismatched: u64,
    pub bits_mismatched: u64,
    pub flips_1_to_0: u64,
    pub flips_0_to_1: u64,
    pub failure: FailureType,
    pub suspects: Suspects,
    /// Ascending byte offsets with at least one 1→0 flip.
    pub ones_to_zero: Vec<usize>,
    /// Ascending byte offsets with at least one 0→1 flip.
    pub zeros_to_one: Vec<usize>,
}

impl Classification {
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.failure == FailureType::NoFailure
    }

    /// Human readable description. For [`FailureType::Mixed`] it lists every suspect that was
    /// raised, e.g. `SS_Setup+S_Hold`.
    pub fn description(&self) -> String {
        if self.failure != FailureType::Mixed {
            return self.failure.as_str().to_string();
        }

        let s = &self.suspects;
        let mut parts = Vec::new();
        if s.strong_setup {
            parts.push(FailureType::SsSetup.as_str());
        } else if s.weak_setup {
            parts.push(FailureType::SSetup.as_str());
        }
        if s.payload_setup {
            parts.push(FailureType::PayloadSetup.as_str());
        }
        if s.strong_hold {
            parts.push(FailureType::SsHold.as_str());
        } else if s.weak_hold {
            parts.push(FailureType::SHold.as_str());
        }

        parts.join("+")
    }
}

/// Classifies the differences between `expected` and `received`. Bytes below `header_len` are
/// header for the purpose of setup attribution.
pub fn classify(expected: &[u8], received: &[u8], header_len: usize) -> Classification {
    let mut c = Classification {
        bytes_mismatched: 0,
        bits_mismatched: 0,
        flips_1_to_0: 0,
        flips_0_to_1: 0,
        failure: FailureType::NoFailure,
        suspects: Suspects::default(),
        ones_to_zero: Vec::new(),
        zeros_to_one: Vec::new(),
    };

    for (offset, (exp, rcv)) in expected.iter().zip(received.iter()).enumerate() {
        let diff = exp ^ rcv;
        if diff == 0 {
            continue;
        }

        c.bytes_mismatched += 1;
        c.bits_mismatched += diff.count_ones() as u64;
        if diff.count_ones() > 1 {
            c.suspects.multi_bit = true;
        }

        // bits that were 1 and are now 0
        let cleared = diff & exp;
        // bits that were 0 and are now 1
        let set = diff & rcv;

        if cleared != 0 {
            c.flips_1_to_0 += cleared.count_ones() as u64;
            c.ones_to_zero.push(offset);
            if offset < header_len {
                if cleared & (1 << STRONG_SETUP_BIT) != 0 {
                    c.suspects.strong_setup = true;
                }
                if cleared & !(1 << STRONG_SETUP_BIT) != 0 {
                    c.suspects.weak_setup = true;
                }
            } else {
                c.suspects.payload_setup = true;
            }
        }

        if set != 0 {
            c.flips_0_to_1 += set.count_ones() as u64;
            c.zeros_to_one.push(offset);
        }
    }

    if expected.len() != received.len() {
        c.suspects.length_mismatch = true;
        let extra = expected.len().abs_diff(received.len()) as u64;
        c.bytes_mismatched += extra;
    }

    if c.suspects.multi_bit || c.suspects.length_mismatch {
        c.failure = FailureType::Unknown;
        return c;
    }

    if !c.zeros_to_one.is_empty() {
        let groups = hold::group(&c.zeros_to_one);
        c.suspects.strong_hold = groups.strong;
        c.suspects.weak_hold = groups.weak;
    }

    c.failure = match (c.suspects.setup(), c.suspects.hold()) {
        (None, None) => FailureType::NoFailure,
        (Some(f), None) | (None, Some(f)) => f,
        (Some(_), Some(_)) => FailureType::Mixed,
    };

    c
}
