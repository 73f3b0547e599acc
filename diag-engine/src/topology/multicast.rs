use async_trait::async_trait;
use tracing::{debug, warn};

use diag_backend::{Backend, Egress, ForwardRule, McGroupHandle, McGroupId, McNodeHandle};
use diag_common::{DevPort, SessHdl};

use super::{Direction, Flow, TopoCx, Topology, MAX_FLOWS};
use crate::{
    error::{DiagError, Result},
    session::{Session, TestKind},
};

/// Backend objects of one flow's multicast tree.
#[derive(Debug, Default)]
struct Tree {
    group: Option<McGroupHandle>,
    node: Option<McNodeHandle>,
    associated: bool,
}

/// Every port loops its traffic back into the pipeline, where a multicast group replicates it
/// to the same local port on every other pipe in the session and `extra_copies` times to a
/// designated port. Each copy loops back and returns to the CPU.
#[derive(Debug)]
pub(super) struct Multicast {
    /// Replication targets per flow, duplicates included.
    targets: Vec<Vec<DevPort>>,
    trees: Vec<Tree>,
}

/// The port that receives the extra copies of flow `origin`. Never the origin itself.
fn designated(ports: &[DevPort], origin: DevPort) -> DevPort {
    if ports[0] == origin {
        ports[1]
    } else {
        ports[0]
    }
}

/// Replication targets of the flow originating at `origin`: its peers on other pipes, then
/// the extra copies.
fn targets(ports: &[DevPort], origin: DevPort, extra_copies: u16) -> Vec<DevPort> {
    let mut targets: Vec<_> = ports
        .iter()
        .filter(|p| p.local() == origin.local() && p.pipe() != origin.pipe())
        .copied()
        .collect();
    targets.extend(std::iter::repeat(designated(ports, origin)).take(extra_copies as usize));
    targets
}

pub(super) fn flows(ports: &[DevPort], extra_copies: u16) -> Result<Vec<Flow>> {
    if ports.len() < 2 {
        return Err(DiagError::invalid("multicast loopback needs at least two ports"));
    }

    ports
        .iter()
        .map(|origin| {
            let copies = targets(ports, *origin, extra_copies).len() as u64;
            if copies == 0 {
                return Err(DiagError::invalid(format!(
                    "port {origin} has no peers and no extra copies are configured"
                )));
            }
            Ok(Flow { path: vec![*origin], copies, reversible: false })
        })
        .collect()
}

/// Multicast group id of flow `flow` of a session. Unique per device.
fn group_id(hdl: SessHdl, flow: usize) -> McGroupId {
    McGroupId(1 + hdl.slot() * MAX_FLOWS as u16 + flow as u16)
}

impl Multicast {
    pub(super) fn new(ports: &[DevPort], extra_copies: u16) -> Self {
        let targets: Vec<_> = ports.iter().map(|p| targets(ports, *p, extra_copies)).collect();
        let trees = targets.iter().map(|_| Tree::default()).collect();
        Self { targets, trees }
    }

    async fn release_tree<B: Backend>(cx: &TopoCx<'_, B>, tree: &mut Tree) -> usize {
        let mut errors = 0;

        if let (Some(group), Some(node)) = (tree.group, tree.node) {
            if tree.associated {
                if let Err(e) = cx.backend.mc_dissociate(cx.dev, group, node).await {
                    warn!(error = %e, "failed to dissociate multicast node");
                    errors += 1;
                }
                tree.associated = false;
            }
        }
        if let Some(node) = tree.node.take() {
            if let Err(e) = cx.backend.mc_node_destroy(cx.dev, node).await {
                warn!(error = %e, "failed to destroy multicast node");
                errors += 1;
            }
        }
        if let Some(group) = tree.group.take() {
            if let Err(e) = cx.backend.mc_group_destroy(cx.dev, group).await {
                warn!(error = %e, "failed to destroy multicast group");
                errors += 1;
            }
        }

        errors
    }
}

#[async_trait]
impl<B: Backend> Topology<B> for Multicast {
    fn kind(&self) -> TestKind {
        TestKind::MulticastLoopback
    }

    fn rules(&self, cx: &TopoCx<'_, B>, session: &Session, dir: Direction) -> Vec<ForwardRule> {
        if dir == Direction::Reverse {
            return Vec::new();
        }

        let cpu = cx.cpu_port();
        let mut rules = Vec::new();
        for (k, flow) in session.flows().iter().enumerate() {
            let range = session.plan().range(k, dir);
            let origin = flow.origin(dir);
            rules.push(ForwardRule::new(cpu, Egress::Port(origin), range));
            rules.push(ForwardRule::new(
                origin,
                Egress::Multicast(group_id(session.hdl(), k)),
                range,
            ));

            let mut returning = self.targets[k].clone();
            returning.sort_unstable();
            returning.dedup();
            for port in returning {
                rules.push(ForwardRule::new(port, Egress::Port(cpu), range));
            }
        }

        rules
    }

    async fn acquire(&mut self, cx: &TopoCx<'_, B>, session: &Session) -> Result<()> {
        for k in 0..self.trees.len() {
            if let Err(e) = self.build_tree(cx, session.hdl(), k).await {
                self.release(cx, session).await;
                return Err(e);
            }
        }

        debug!(sess = %session.hdl(), groups = self.trees.len(), "created multicast trees");
        Ok(())
    }

    async fn release(&mut self, cx: &TopoCx<'_, B>, _session: &Session) -> usize {
        let mut errors = 0;
        for tree in &mut self.trees {
            errors += Self::release_tree(cx, tree).await;
        }
        errors
    }
}

impl Multicast {
    async fn build_tree<B: Backend>(
        &mut self,
        cx: &TopoCx<'_, B>,
        hdl: SessHdl,
        k: usize,
    ) -> Result<()> {
        let tree = &mut self.trees[k];
        let group = cx.backend.mc_group_create(cx.dev, group_id(hdl, k)).await?;
        tree.group = Some(group);

        let node = cx.backend.mc_node_create(cx.dev, k as u16, &self.targets[k]).await?;
        tree.node = Some(node);

        cx.backend.mc_associate(cx.dev, group, node).await?;
        tree.associated = true;

        Ok(())
    }
}
