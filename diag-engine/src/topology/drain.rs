use std::mem;

use tracing::{debug, trace};

use diag_backend::{Backend, Egress, ForwardRule, DRAIN_RULE_PRIORITY};

use super::TopoCx;
use crate::{error::Result, session::Session};

/// Flushes in-flight test traffic of a session to the CPU.
///
/// Every step installs drain rules on all session ports over a range twice as wide as the
/// step before, removes the previous step's rules and pauses for the drain interval, so the
/// receive path is never flooded at once. The last step covers the session's block, or the
/// whole port space in drain-full-range mode.
pub(crate) async fn drain<B: Backend>(cx: &TopoCx<'_, B>, session: &Session) -> Result<()> {
    let steps = cx.options.drain_iterations;
    let full = cx.options.drain_full_range;
    let cpu = cx.cpu_port();

    let mut installed = Vec::new();
    for step in 0..steps {
        let range = session.plan().drain_step(step, steps, full);
        let rules: Vec<_> = session
            .ports()
            .iter()
            .map(|p| ForwardRule::new(*p, Egress::Port(cpu), range).with_priority(DRAIN_RULE_PRIORITY))
            .collect();

        let next = match cx.install_rules(&rules).await {
            Ok(next) => next,
            Err(e) => {
                cx.remove_rules(&installed).await;
                return Err(e);
            }
        };

        let previous = mem::replace(&mut installed, next);
        if let Err(e) = cx.try_remove_rules(&previous).await {
            cx.remove_rules(&installed).await;
            return Err(e);
        }

        trace!(sess = %session.hdl(), step, %range, "draining");
        tokio::time::sleep(cx.options.drain_interval).await;
    }

    cx.try_remove_rules(&installed).await?;

    debug!(sess = %session.hdl(), steps, "drained session");
    Ok(())
}
