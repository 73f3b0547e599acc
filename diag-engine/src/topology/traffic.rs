//! CPU packet injection.
use tracing::{debug, trace};

use diag_backend::Backend;

use super::{Direction, StartParams, TopoCx};
use crate::{error::Result, session::Session};

/// Sends `params.num_packets` packets per flow and direction from the CPU. Every packet is
/// stamped with a fresh identifier and recorded in the packet database before it is handed to
/// the transmit path. Packets are spread over the flow's sub-range at random.
pub(super) async fn inject<B: Backend>(
    cx: &TopoCx<'_, B>,
    session: &Session,
    params: &StartParams,
) -> Result<()> {
    let mut builder = cx.packet_builder()?;
    let codec = cx.shared.codec();
    let dirs: &[Direction] = if params.bidir { &Direction::BOTH } else { &[Direction::Forward] };

    let mut sent = 0u64;
    for _ in 0..params.num_packets {
        for (k, flow) in session.flows().iter().enumerate() {
            for dir in dirs {
                if *dir == Direction::Reverse && !flow.reversible {
                    continue;
                }

                let range = session.plan().range(k, *dir);
                let tcp_dst = range.start + builder.random_below(range.len() as u16);
                let mut pkt = builder.build(params.pkt_size, tcp_dst)?;
                let id = codec.encode(session.hdl(), flow.origin(*dir), &mut pkt)?;
                let pkt = pkt.freeze();

                cx.shared.db.add(id, &pkt)?;
                trace!(%id, tcp_dst, "transmitting");
                cx.backend.transmit(cx.dev, pkt).await?;

                session.stats().lock().increment_tx(k, *dir, 1);
                sent += 1;
            }
        }
    }

    debug!(sess = %session.hdl(), sent, size = params.pkt_size, "injected packets");
    Ok(())
}
