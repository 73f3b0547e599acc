use diag_backend::Backend;
use diag_common::DevPort;

use super::{Flow, Topology};
use crate::{
    error::{DiagError, Result},
    session::TestKind,
};

/// Ports grouped two at a time in list order. The CPU injects into the first port of a group,
/// which forwards to the second, which returns to the CPU. On an odd count the last group
/// takes three ports.
#[derive(Debug)]
pub(super) struct Pair;

pub(super) fn flows(ports: &[DevPort]) -> Result<Vec<Flow>> {
    if ports.len() < 2 {
        return Err(DiagError::invalid("paired loopback needs at least two ports"));
    }

    let mut groups: Vec<Vec<DevPort>> = ports.chunks(2).map(<[DevPort]>::to_vec).collect();
    if ports.len() % 2 == 1 {
        if let Some(last) = groups.pop().and_then(|g| g.first().copied()) {
            if let Some(prev) = groups.last_mut() {
                prev.push(last);
            }
        }
    }

    Ok(groups.into_iter().map(Flow::chain).collect())
}

impl<B: Backend> Topology<B> for Pair {
    fn kind(&self) -> TestKind {
        TestKind::PairedLoopback
    }
}
