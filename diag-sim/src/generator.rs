//! Continuous packet generator emulation.
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use diag_backend::PktGenApp;
use diag_common::DevId;

use crate::SimSwitch;

/// Emission period of a running generator.
const TICK: Duration = Duration::from_millis(1);

/// Emits the application's template at `rate` packets per second until cancelled.
pub(crate) fn spawn(
    sim: SimSwitch,
    dev: DevId,
    app: PktGenApp,
    rate: Arc<AtomicU64>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // fractional packets carried over between ticks, in thousandths
        let mut carry = 0u64;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    carry += rate.load(Ordering::Relaxed);
                    let burst = carry / 1000;
                    carry %= 1000;
                    if burst > 0 {
                        sim.generate(dev, app, burst);
                    }
                }
            }
        }

        trace!(%dev, %app, "generator stopped");
    })
}
