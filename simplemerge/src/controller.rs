use std::sync::{Arc, LazyLock};

use simplemerge_campaign::{Campaign, CampaignConfig, RunHandle, RunPhase};
use simplemerge_common::{Signal, audit, internal, logging, tracing};
use simplemerge_control::ControlServer;
use tokio::{net::UnixStream, sync::broadcast};

use crate::{backends::Backends, config::DaemonConfig, control_handler::SimplemergeControlHandler};

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_requested() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    Ok(())
}

/// Stop `run` and wait for the dispatch loop to acknowledge
///
/// A second Ctrl+C abandons the wait.
async fn stop_run(run: &RunHandle) -> anyhow::Result<RunPhase> {
    run.request_stop();

    tokio::select! {
        phase = run.wait() => Ok(phase),
        _ = tokio::signal::ctrl_c() => {
            anyhow::bail!("Forced shutdown while run {} was still stopping", run.run_id())
        }
    }
}

/// The daemon: one campaign run plus the control socket that observes it
pub struct Simplemerge {
    config: DaemonConfig,
}

impl Simplemerge {
    #[must_use]
    pub const fn new(config: DaemonConfig) -> Self {
        Self { config }
    }

    /// Run the configured campaign to completion
    ///
    /// # Errors
    ///
    /// This function will return an error if the backends cannot be built,
    /// the campaign fails setup, or the control socket cannot be bound.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();
        audit::init(self.config.audit.clone());

        internal!(level = INFO, "Controller running");

        let Backends {
            collaborators,
            inbox,
        } = Backends::from_config(&self.config.backends, &self.config.transport)?;

        let campaign = Arc::new(Campaign::new(collaborators.clone()));
        let handler = Arc::new(SimplemergeControlHandler::new(
            Arc::clone(&campaign),
            self.config.campaign.clone(),
            collaborators,
            inbox,
        ));

        if UnixStream::connect(&self.config.control_socket).await.is_ok() {
            anyhow::bail!(
                "Another simplemerge instance owns the control socket {}",
                self.config.control_socket
            );
        }

        let server = ControlServer::new(&self.config.control_socket, handler)?;
        let shutdown = SHUTDOWN_BROADCAST.subscribe();
        let mut control = tokio::spawn(async move { server.serve(shutdown).await });

        let ret = tokio::select! {
            r = Self::supervise(&campaign, self.config.campaign.clone()) => r,
            r = &mut control => {
                match r {
                    Ok(Ok(())) => Err(anyhow::anyhow!("Control server exited unexpectedly")),
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => Err(e.into()),
                }
            }
        };

        internal!(level = INFO, "Shutting down...");

        // A forced shutdown has already requested the stop and gave up waiting
        if let Some(run) = campaign.current()
            && run.is_active()
            && run.request_stop()
        {
            run.wait().await;
        }

        // Nobody may be listening once the control server has gone
        let _ = SHUTDOWN_BROADCAST.send(Signal::Shutdown);
        if !control.is_finished() {
            match control.await {
                Ok(Err(e)) => tracing::warn!("Control server: {e}"),
                Err(e) => tracing::warn!("Control server task: {e}"),
                Ok(Ok(())) => {}
            }
        }

        ret
    }

    /// Launch the run and wait for it to end, stopping it on a signal
    async fn supervise(
        campaign: &Campaign,
        config: CampaignConfig,
    ) -> anyhow::Result<()> {
        let run = campaign.launch(config).await?.into_handle();
        internal!(level = INFO, run_id = %run.run_id(), "Campaign launched");

        let phase = tokio::select! {
            phase = run.wait() => phase,
            r = shutdown_requested() => {
                r?;
                stop_run(&run).await?
            }
        };

        let progress = run.poll_progress();
        internal!(
            level = INFO,
            run_id = %progress.run_id,
            phase = %phase,
            sent = progress.total_sent,
            goal = progress.total_goal,
            rounds = progress.rounds,
            ledger_failures = progress.ledger_failures,
            "Campaign finished"
        );

        match phase {
            RunPhase::Failed => anyhow::bail!("Run {} failed", progress.run_id),
            _ => Ok(()),
        }
    }
}
