use async_trait::async_trait;
use tracing::{debug, info, warn};

use diag_backend::{Backend, ForwardRule, PktGenApp, PktGenConfig};
use diag_common::DevPort;

use super::{chain_rules, Direction, Flow, StartParams, TopoCx, Topology};
use crate::{
    error::{DiagError, Result},
    session::{Session, TestKind},
};

/// Per-flow packet generator state.
#[derive(Debug, Default)]
struct Generator {
    app: Option<PktGenApp>,
    /// Offset of the current template in the pipe's generator buffer.
    buffer: Option<usize>,
    /// The backend app holds a template.
    loaded: bool,
    /// Packets generated by earlier starts.
    tx_base: u64,
}

/// Traffic from the on-chip packet generator. Every port gets one generator application on
/// its pipe, which emits a single stamped template into the port; the port loops it back and
/// returns it to the CPU.
#[derive(Debug)]
pub(super) struct Stream {
    pkt_rate: u64,
    continuous: bool,
    generators: Vec<Generator>,
}

pub(super) fn flows(ports: &[DevPort]) -> Vec<Flow> {
    ports.iter().map(|p| Flow { path: vec![*p], copies: 1, reversible: false }).collect()
}

impl Stream {
    pub(super) fn new(pkt_rate: u64, continuous: bool, num_flows: usize) -> Self {
        Self {
            pkt_rate,
            continuous,
            generators: (0..num_flows).map(|_| Generator::default()).collect(),
        }
    }

    /// Apps configured in the backend.
    fn loaded_apps(&self) -> Vec<PktGenApp> {
        self.generators.iter().filter(|g| g.loaded).filter_map(|g| g.app).collect()
    }

    /// Returns the template buffers of the previous start.
    fn free_buffers<B: Backend>(&mut self, cx: &TopoCx<'_, B>) {
        let mut pktgen = cx.pktgen.lock();
        for g in &mut self.generators {
            if let (Some(app), Some(offset)) = (g.app, g.buffer.take()) {
                pktgen.free_buffer(app.pipe, offset);
            }
        }
    }

    /// Loads a template into every generator and starts it. Flows whose app was started are
    /// pushed to `started`.
    async fn launch<B: Backend>(
        &mut self,
        cx: &TopoCx<'_, B>,
        session: &Session,
        params: &StartParams,
        pkt_count: Option<u64>,
        started: &mut Vec<(usize, PktGenApp)>,
    ) -> Result<()> {
        let mut builder = cx.packet_builder()?;
        let codec = cx.shared.codec();

        for (k, flow) in session.flows().iter().enumerate() {
            let Some(app) = self.generators[k].app else {
                return Err(DiagError::InvalidState(format!("flow {k} has no generator")));
            };

            let range = session.plan().range(k, Direction::Forward);
            let mut template = builder.build(params.pkt_size, range.start)?;
            let id = codec.encode(session.hdl(), flow.origin(Direction::Forward), &mut template)?;
            let template = template.freeze();
            cx.shared.db.add(id, &template)?;

            let offset = cx
                .pktgen
                .lock()
                .alloc_buffer(app.pipe, template.len())
                .ok_or(DiagError::NoResources("packet generator buffer"))?;
            self.generators[k].buffer = Some(offset);

            let cfg = PktGenConfig {
                buffer_offset: offset,
                pkt_len: template.len(),
                pkt_count,
                pkt_rate: self.pkt_rate,
            };
            cx.backend.pktgen_setup(cx.dev, app, &cfg, template).await?;
            self.generators[k].loaded = true;
            cx.backend.pktgen_start(cx.dev, app).await?;
            started.push((k, app));
        }

        Ok(())
    }
}

#[async_trait]
impl<B: Backend> Topology<B> for Stream {
    fn kind(&self) -> TestKind {
        TestKind::Stream
    }

    fn rules(&self, cx: &TopoCx<'_, B>, session: &Session, dir: Direction) -> Vec<ForwardRule> {
        if dir == Direction::Reverse {
            return Vec::new();
        }

        let cpu = cx.cpu_port();
        session
            .flows()
            .iter()
            .enumerate()
            .flat_map(|(k, flow)| {
                let origin = flow.origin(dir);
                let inject = cx.backend.pktgen_port(cx.dev, origin.pipe());
                chain_rules(inject, &flow.path, cpu, session.plan().range(k, dir))
            })
            .collect()
    }

    async fn acquire(&mut self, cx: &TopoCx<'_, B>, session: &Session) -> Result<()> {
        let mut pktgen = cx.pktgen.lock();
        for (k, flow) in session.flows().iter().enumerate() {
            let pipe = flow.origin(Direction::Forward).pipe();
            let Some(app) = pktgen.alloc_app(pipe) else {
                for g in &mut self.generators {
                    if let Some(app) = g.app.take() {
                        pktgen.free_app(app);
                    }
                }
                return Err(DiagError::NoResources("packet generator application"));
            };
            self.generators[k].app = Some(app);
        }

        debug!(sess = %session.hdl(), apps = self.generators.len(), "allocated packet generator apps");
        Ok(())
    }

    async fn start(
        &mut self,
        cx: &TopoCx<'_, B>,
        session: &Session,
        params: &StartParams,
    ) -> Result<()> {
        if params.bidir {
            warn!(sess = %session.hdl(), "stream tests only run forward");
        }

        self.free_buffers(cx);
        let pkt_count = if self.continuous { None } else { Some(params.num_packets) };

        {
            let stats = session.stats().lock();
            for (k, g) in self.generators.iter_mut().enumerate() {
                g.tx_base = stats.flows.get(k).map(|f| f[Direction::Forward].tx).unwrap_or(0);
            }
        }

        let mut started = Vec::with_capacity(self.generators.len());
        if let Err(e) = self.launch(cx, session, params, pkt_count, &mut started).await {
            // nothing keeps generating once the session is back to configured
            for (k, app) in started {
                if let Err(stop) = cx.backend.pktgen_stop(cx.dev, app).await {
                    warn!(%app, error = %stop, "failed to stop packet generator");
                }
                if let Ok(generated) = cx.backend.pktgen_counter(cx.dev, app).await {
                    let tx = self.generators[k].tx_base + generated;
                    session.stats().lock().set_tx(k, Direction::Forward, tx);
                }
            }
            return Err(e);
        }

        info!(sess = %session.hdl(), rate = self.pkt_rate, continuous = self.continuous, "packet generators started");
        Ok(())
    }

    async fn halt(&mut self, cx: &TopoCx<'_, B>, session: &Session) -> Result<()> {
        for app in self.loaded_apps() {
            cx.backend.pktgen_stop(cx.dev, app).await?;
        }
        self.refresh(cx, session).await
    }

    async fn refresh(&self, cx: &TopoCx<'_, B>, session: &Session) -> Result<()> {
        for (k, g) in self.generators.iter().enumerate() {
            let Some(app) = g.app.filter(|_| g.loaded) else { continue };
            let generated = cx.backend.pktgen_counter(cx.dev, app).await?;
            session.stats().lock().set_tx(k, Direction::Forward, g.tx_base + generated);
        }
        Ok(())
    }

    async fn adjust(&mut self, cx: &TopoCx<'_, B>, session: &Session, pkt_rate: u64) -> Result<()> {
        if pkt_rate == 0 {
            return Err(DiagError::invalid("stream packet rate must be positive"));
        }

        for app in self.loaded_apps() {
            cx.backend.pktgen_adjust(cx.dev, app, pkt_rate).await?;
        }
        self.pkt_rate = pkt_rate;

        info!(sess = %session.hdl(), rate = pkt_rate, "adjusted packet generator rate");
        Ok(())
    }

    async fn release(&mut self, cx: &TopoCx<'_, B>, _session: &Session) -> usize {
        let mut errors = 0;
        for app in self.loaded_apps() {
            if let Err(e) = cx.backend.pktgen_cleanup(cx.dev, app).await {
                warn!(%app, error = %e, "failed to clean up packet generator");
                errors += 1;
            }
        }

        self.free_buffers(cx);
        let mut pktgen = cx.pktgen.lock();
        for g in &mut self.generators {
            if let Some(app) = g.app.take() {
                pktgen.free_app(app);
            }
            g.loaded = false;
        }

        errors
    }
}
