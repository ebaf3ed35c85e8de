use crate::generator::profile::open_device;
use crate::output::bridge::StatusBridge;
use crate::output::emitter::Emitter;
use crate::output::plot::PlotWriter;
use crate::workflow::config::SweepConfig;
use anyhow::Context;
use log::info;
use std::sync::atomic::AtomicBool;
use sweepcore::interface::{RecordSink, SampleSource};
use sweepcore::session::{SessionOrchestrator, SessionSummary};

#[derive(Clone)]
pub struct Runner {
    config: SweepConfig,
}

impl Runner {
    pub fn new(config: SweepConfig) -> Self {
        Self { config }
    }

    /// Opens the configured device and output, then sweeps until done.
    pub fn execute(&self, shutdown: &AtomicBool) -> anyhow::Result<SessionSummary> {
        let mut source = open_device(
            &self.config.device,
            &self.config.device_settings,
            self.config.generator_config(),
        )
        .context("opening device")?;
        let session = self.session(&source)?;

        let mut emitter = Emitter::new(self.config.format, self.config.output.as_deref())?;
        if let Some(server) = &self.config.server {
            emitter = emitter
                .with_collector(server, self.config.port)
                .with_context(|| format!("preparing UDP output to {server}"))?;
        }
        if self.config.plot {
            let plots = PlotWriter::new(self.config.plot_directory());
            info!("writing detection plots to {}", plots.directory().display());
            emitter = emitter.with_plots(plots);
        }
        if let Some(address) = self.config.serve {
            let bridge = StatusBridge::new(session.metrics());
            bridge.serve(address)?;
            emitter = emitter.with_bridge(bridge);
        }

        session
            .run(&mut source, &mut emitter, shutdown)
            .context("running sweep session")
    }

    /// Sweeps an already opened source into any sink.
    pub fn execute_with(
        &self,
        source: &mut dyn SampleSource,
        sink: &mut dyn RecordSink,
        shutdown: &AtomicBool,
    ) -> anyhow::Result<SessionSummary> {
        let session = self.session(&*source)?;
        session
            .run(source, sink, shutdown)
            .context("running sweep session")
    }

    fn session(&self, source: &dyn SampleSource) -> anyhow::Result<SessionOrchestrator> {
        let session_config = self
            .config
            .to_session_config()
            .context("validating sweep configuration")?;
        SessionOrchestrator::new(session_config, source).context("planning sweep")
    }
}
