//! Loopback signal-integrity diagnostics for packet-switching ASICs.
//!
//! A test session owns a set of ports on one device. Test packets are injected from the CPU
//! (or from the on-chip packet generator), forwarded through the ports by match-action rules
//! keyed on TCP destination port ranges, looped back at the MAC or PCS, and finally punted back
//! to the CPU. Every received packet is compared bit by bit with the copy recorded at transmit
//! time; mismatches are classified into setup and hold timing failures.
//!
//! [`Diag`] is the entry point. It is generic over a [`Backend`](diag_backend::Backend), the
//! driver of the actual forwarding hardware.
mod classify;
mod ctx;
mod db;
mod diag;
mod error;
mod options;
mod pktgen;
mod rx;
mod session;
mod status;
mod topology;

pub use classify::{
    classify, Classification, FailureType, Suspects, DEFAULT_HEADER_LEN, HOLD_INTERVAL,
    HOLD_THRESHOLD, STRONG_SETUP_BIT,
};
pub use db::{DbError, FlipRecord, PktDb};
pub use diag::Diag;
pub use error::{DiagError, ErrorKind, Result};
pub use options::{DiagOptions, DEFAULT_MAX_SESSIONS, MAX_SESSIONS_CEILING};
pub use pktgen::{PktGenAllocator, PKTGEN_APPS_PER_PIPE, PKTGEN_BUFFER_ALIGN, PKTGEN_BUFFER_SIZE};
pub use rx::RxStats;
pub use session::{
    DirStats, FailureTally, FlowStats, Registry, SessionInfo, SessionStats, TestKind, TestState,
};
pub use status::{FlowResult, TestStatus, Verdict};
pub use topology::{
    Direction, Flow, StartParams, TcpPlan, TestConfig, BLOCK_LEN, MAX_FLOWS, REVERSE_OFFSET,
    SUB_RANGE_LEN,
};

pub use diag_common::{DevId, DevPort, LoopbackMode, PortSelection, SessHdl};
