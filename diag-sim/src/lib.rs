#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! A simulated switch for running diagnostics without hardware.
//!
//! [`SimSwitch`] implements the full backend contract in memory: forwarding rules matched by
//! TCP destination port range, per-port loopback modes, multicast replication, a packet
//! generator per pipe and delivery of punted packets on receive streams. Ports can be given an
//! [`Impairment`] to flip bits, truncate or lose packets, and any backend call can be made to
//! fail on demand with [`SimSwitch::fail_on`].

mod config;
pub use config::*;

mod generator;

mod impairment;
pub use impairment::{Flip, Impairment};

mod switch;
pub use switch::{SimCounters, SimOp, SimSwitch, PKTGEN_BUFFER_LEN};
