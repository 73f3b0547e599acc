use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use diag_backend::{RxPath, RxStream};

use crate::ctx::Shared;

/// Drains one receive path until the stream ends or the token is cancelled.
pub(crate) struct RxDriver {
    pub(crate) path: RxPath,
    pub(crate) stream: RxStream,
    pub(crate) shared: Arc<Shared>,
    pub(crate) cancel: CancellationToken,
}

impl RxDriver {
    pub(crate) async fn run(mut self) {
        info!(path = %self.path, "receive driver started");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!(path = %self.path, "receive driver cancelled");
                    break;
                }
                pkt = self.stream.next() => match pkt {
                    Some(pkt) => super::process(&self.shared, self.path, &pkt),
                    None => {
                        debug!(path = %self.path, "receive stream ended");
                        break;
                    }
                },
            }
        }

        info!(path = %self.path, received = self.shared.rx_stats.packets(self.path), "receive driver stopped");
    }
}
