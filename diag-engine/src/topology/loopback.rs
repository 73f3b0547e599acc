use diag_backend::Backend;
use diag_common::DevPort;

use super::{Flow, Topology};
use crate::session::TestKind;

/// Every port is its own flow: CPU → port, looped back into the port, port → CPU.
#[derive(Debug)]
pub(super) struct Loopback;

pub(super) fn flows(ports: &[DevPort]) -> Vec<Flow> {
    ports.iter().map(|p| Flow::chain(vec![*p])).collect()
}

impl<B: Backend> Topology<B> for Loopback {
    fn kind(&self) -> TestKind {
        TestKind::Loopback
    }
}
