//! Campaign launch and the single-flight guard

mod dispatch;
mod send;
mod setup;

use std::sync::Arc;

use parking_lot::Mutex;
use simplemerge_common::{audit, internal, tracing};

use crate::{
    config::CampaignConfig,
    error::CampaignError,
    run::{RunHandle, RunPhase, RunState},
    service::{IdentityProvider, LedgerStore, MailTransport, TemplateStore},
};

/// The external services a campaign run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub identities: Arc<dyn IdentityProvider>,
    pub templates: Arc<dyn TemplateStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub transport: Arc<dyn MailTransport>,
}

/// Result of a launch request.
#[derive(Debug, Clone)]
pub enum Launched {
    /// A new run was started
    Started(RunHandle),
    /// A run was already in progress; nothing new was started
    AlreadyRunning(RunHandle),
}

impl Launched {
    #[must_use]
    pub const fn handle(&self) -> &RunHandle {
        match self {
            Self::Started(handle) | Self::AlreadyRunning(handle) => handle,
        }
    }

    #[must_use]
    pub fn into_handle(self) -> RunHandle {
        match self {
            Self::Started(handle) | Self::AlreadyRunning(handle) => handle,
        }
    }

    #[must_use]
    pub const fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

/// Launches campaign runs, at most one at a time.
pub struct Campaign {
    collaborators: Collaborators,
    current: Mutex<Option<RunHandle>>,
}

impl std::fmt::Debug for Campaign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Campaign")
            .field("current", &self.current.lock().as_ref().map(RunHandle::run_id))
            .finish_non_exhaustive()
    }
}

impl Campaign {
    #[must_use]
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            current: Mutex::new(None),
        }
    }

    /// The most recently launched run, finished or not.
    #[must_use]
    pub fn current(&self) -> Option<RunHandle> {
        self.current.lock().clone()
    }

    /// Validate `config`, prepare the run and start the dispatch loop in the
    /// background.
    ///
    /// A launch while another run is active starts nothing and returns
    /// [`Launched::AlreadyRunning`] with the active run's handle.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError::Setup`] if the configuration is invalid, the
    /// template cannot be fetched, or no sender can be authenticated. In the
    /// latter two cases the run is left in [`RunPhase::Failed`].
    pub async fn launch(&self, config: CampaignConfig) -> Result<Launched, CampaignError> {
        config.validate()?;

        let handle = {
            let mut current = self.current.lock();
            if let Some(active) = current.as_ref().filter(|handle| handle.is_active()) {
                internal!(
                    level = INFO,
                    run_id = %active.run_id(),
                    "Launch ignored, a campaign is already running"
                );
                return Ok(Launched::AlreadyRunning(active.clone()));
            }

            let state = RunState::new(config.dry_run);
            state.transition(RunPhase::Running);
            let handle = RunHandle::new(state);
            *current = Some(handle.clone());
            handle
        };

        internal!(level = INFO, run_id = %handle.run_id(), dry_run = config.dry_run, "Preparing campaign");

        let prepared = match setup::prepare(&self.collaborators, &config, &handle).await {
            Ok(prepared) => prepared,
            Err(err) => {
                tracing::error!(run_id = %handle.run_id(), error = %err, "Campaign setup failed");
                handle.state.transition(RunPhase::Failed);
                audit::log_campaign_finished(&handle.run_id(), "Failed", 0, 0, 0);
                return Err(err.into());
            }
        };

        audit::log_campaign_launched(
            &handle.run_id(),
            &prepared.template.subject,
            prepared.queues.len(),
            handle.progress().total_goal(),
            config.dry_run,
        );

        let dispatch = dispatch::Dispatch::new(
            handle.clone(),
            config,
            prepared,
            Arc::clone(&self.collaborators.transport),
        );
        tokio::spawn(dispatch.run());

        Ok(Launched::Started(handle))
    }
}
