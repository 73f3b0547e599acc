use std::{fmt, str::FromStr};

use thiserror::Error;

/// Number of bits used by the session slot inside a [`SessHdl`].
const SLOT_BITS: u16 = 7;
const SLOT_MASK: u16 = (1 << SLOT_BITS) - 1;

/// Number of bits used by the pipe-local port number inside a [`DevPort`].
const LOCAL_PORT_BITS: u16 = 7;
const LOCAL_PORT_MASK: u16 = (1 << LOCAL_PORT_BITS) - 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown loopback mode: {0}")]
    LoopbackMode(String),
}

/// Identifier of an attached ASIC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevId(pub u16);

impl fmt::Display for DevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// A device port number. The upper bits select the pipe, the lower 7 bits the port within
/// that pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevPort(pub u16);

impl DevPort {
    #[inline]
    pub const fn new(pipe: u16, local: u16) -> Self {
        Self(pipe << LOCAL_PORT_BITS | (local & LOCAL_PORT_MASK))
    }

    #[inline]
    pub const fn pipe(self) -> u16 {
        self.0 >> LOCAL_PORT_BITS
    }

    #[inline]
    pub const fn local(self) -> u16 {
        self.0 & LOCAL_PORT_MASK
    }

    /// Returns the same pipe-local port on another pipe.
    #[inline]
    pub const fn on_pipe(self, pipe: u16) -> Self {
        Self::new(pipe, self.local())
    }
}

impl fmt::Display for DevPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A diagnostic session handle. The device id lives in the high bits, the per-device slot in
/// the low 7 bits, so handles are unique across devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessHdl(pub u16);

impl SessHdl {
    /// The largest number of slots a device can ever hand out.
    pub const MAX_SLOTS: usize = 1 << SLOT_BITS;

    #[inline]
    pub const fn new(dev: DevId, slot: u16) -> Self {
        Self(dev.0 << SLOT_BITS | (slot & SLOT_MASK))
    }

    #[inline]
    pub const fn dev(self) -> DevId {
        DevId(self.0 >> SLOT_BITS)
    }

    #[inline]
    pub const fn slot(self) -> u16 {
        self.0 & SLOT_MASK
    }
}

impl fmt::Display for SessHdl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Electrical/logical loopback mode of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoopbackMode {
    /// No loopback, the port transmits on the wire.
    #[default]
    None,
    MacNear,
    MacFar,
    PcsNear,
    SerdesNear,
    SerdesFar,
    /// Loop inside the pipeline, never reaching the MAC.
    Pipe,
}

impl LoopbackMode {
    /// Returns `true` if traffic egressing the port comes back in on the same port.
    #[inline]
    pub const fn is_loopback(self) -> bool {
        !matches!(self, Self::None)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::MacNear => "mac-near",
            Self::MacFar => "mac-far",
            Self::PcsNear => "pcs-near",
            Self::SerdesNear => "serdes-near",
            Self::SerdesFar => "serdes-far",
            Self::Pipe => "pipe",
        }
    }
}

impl fmt::Display for LoopbackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoopbackMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "mac-near" => Ok(Self::MacNear),
            "mac-far" => Ok(Self::MacFar),
            "pcs-near" => Ok(Self::PcsNear),
            "serdes-near" => Ok(Self::SerdesNear),
            "serdes-far" => Ok(Self::SerdesFar),
            "pipe" => Ok(Self::Pipe),
            other => Err(ParseError::LoopbackMode(other.to_string())),
        }
    }
}

/// The ports a test should run on. The special selections expand to the device port list
/// (plus the Ethernet CPU port) when the test is set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSelection {
    List(Vec<DevPort>),
    All,
    AllInternal,
    AllMesh,
}

impl PortSelection {
    #[inline]
    pub const fn is_special(&self) -> bool {
        !matches!(self, Self::List(_))
    }
}

impl From<Vec<DevPort>> for PortSelection {
    fn from(ports: Vec<DevPort>) -> Self {
        Self::List(ports)
    }
}
