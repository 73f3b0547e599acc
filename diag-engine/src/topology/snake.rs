use diag_backend::Backend;
use diag_common::DevPort;

use super::{Flow, Topology};
use crate::session::TestKind;

/// A single chain through every port in the given order. The CPU injects into the first port
/// and the last port returns to the CPU; reverse traffic walks the chain backwards on its own
/// sub-range.
#[derive(Debug)]
pub(super) struct Snake;

pub(super) fn flows(ports: &[DevPort]) -> Vec<Flow> {
    vec![Flow::chain(ports.to_vec())]
}

impl<B: Backend> Topology<B> for Snake {
    fn kind(&self) -> TestKind {
        TestKind::Snake
    }
}
