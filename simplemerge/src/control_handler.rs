//! Control handler implementation for the simplemerge daemon
//!
//! This module implements the `CommandHandler` trait so an operator can
//! observe and steer the running campaign over the control socket.

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use simplemerge_campaign::{
    Campaign, CampaignConfig, Collaborators, RunHandle,
    inbox::{self, InboxReader, Reply, ThreadSummary},
};
use simplemerge_common::{internal, outgoing, tracing};
use simplemerge_control::{
    CampaignCommand, ControlError, Request, RequestCommand, Response, SystemCommand,
    protocol::{InboxCommand, ResponseData, SystemStatus, TemplatePreview},
    server::CommandHandler,
};

/// Handler for control commands
pub struct SimplemergeControlHandler {
    campaign: Arc<Campaign>,
    config: CampaignConfig,
    collaborators: Collaborators,
    inbox: Option<Arc<dyn InboxReader>>,
    /// Daemon start time for uptime calculation
    start_time: Instant,
}

impl SimplemergeControlHandler {
    #[must_use]
    pub fn new(
        campaign: Arc<Campaign>,
        config: CampaignConfig,
        collaborators: Collaborators,
        inbox: Option<Arc<dyn InboxReader>>,
    ) -> Self {
        Self {
            campaign,
            config,
            collaborators,
            inbox,
            start_time: Instant::now(),
        }
    }

    fn current_run(&self) -> simplemerge_control::Result<RunHandle> {
        self.campaign
            .current()
            .ok_or_else(|| ControlError::ServerError("No campaign has been launched".to_string()))
    }

    fn accounts(&self) -> Vec<String> {
        self.config
            .active_senders()
            .map(|(sender, _)| sender.address.clone())
            .collect()
    }

    fn inbox_reader(&self) -> simplemerge_control::Result<&Arc<dyn InboxReader>> {
        self.inbox.as_ref().ok_or_else(|| {
            ControlError::ServerError("The configured transport has no inbox".to_string())
        })
    }
}

#[async_trait]
impl CommandHandler for SimplemergeControlHandler {
    async fn handle_request(&self, request: Request) -> simplemerge_control::Result<Response> {
        match request.command {
            RequestCommand::System(command) => Ok(self.handle_system_command(&command)),
            RequestCommand::Campaign(command) => self.handle_campaign_command(command).await,
            RequestCommand::Inbox(command) => self.handle_inbox_command(command).await,
        }
    }
}

impl SimplemergeControlHandler {
    /// Handle daemon health commands
    fn handle_system_command(&self, command: &SystemCommand) -> Response {
        match command {
            SystemCommand::Ping => Response::ok(),
            SystemCommand::Status => {
                let run = self.campaign.current();
                Response::data(ResponseData::SystemStatus(SystemStatus {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    uptime_secs: self.start_time.elapsed().as_secs(),
                    run_id: run.as_ref().map(RunHandle::run_id),
                    phase: run.as_ref().map(|run| run.phase().to_string()),
                    dry_run: self.config.dry_run,
                    senders: self.config.active_senders().count(),
                }))
            }
        }
    }

    /// Handle commands for the current run
    async fn handle_campaign_command(
        &self,
        command: CampaignCommand,
    ) -> simplemerge_control::Result<Response> {
        match command {
            CampaignCommand::Progress => {
                let run = self.current_run()?;
                Ok(Response::data(ResponseData::Progress(run.poll_progress())))
            }

            CampaignCommand::Stop => {
                let run = self.current_run()?;
                let message = if !run.is_active() {
                    format!("Run {} already finished ({})", run.run_id(), run.phase())
                } else if run.request_stop() {
                    format!("Stop requested for run {}", run.run_id())
                } else {
                    format!("Stop already requested for run {}", run.run_id())
                };

                Ok(Response::data(ResponseData::Message(message)))
            }

            CampaignCommand::Preview => {
                let template = self
                    .collaborators
                    .templates
                    .fetch_template(&self.config.template)
                    .await
                    .map_err(|e| ControlError::ServerError(format!("Template unavailable: {e}")))?;

                let (subject, body) = template.preview();
                Ok(Response::data(ResponseData::Preview(TemplatePreview {
                    subject,
                    body,
                })))
            }
        }
    }

    /// Handle unified inbox commands
    async fn handle_inbox_command(
        &self,
        command: InboxCommand,
    ) -> simplemerge_control::Result<Response> {
        match command {
            InboxCommand::List { max_per_account } => {
                let reader = self.inbox_reader()?;
                let threads = inbox::unified_inbox(
                    &self.collaborators.identities,
                    reader,
                    &self.accounts(),
                    max_per_account,
                )
                .await;

                Ok(Response::data(ResponseData::Inbox(threads)))
            }

            InboxCommand::Reply { thread, body } => self.reply(thread, body).await,
        }
    }

    async fn reply(
        &self,
        thread: ThreadSummary,
        body: String,
    ) -> simplemerge_control::Result<Response> {
        self.inbox_reader()?;

        if !self.accounts().contains(&thread.account) {
            return Err(ControlError::ServerError(format!(
                "{} is not a configured sender",
                thread.account
            )));
        }

        let reply = Reply::new(thread, body).map_err(|e| ControlError::ServerError(e.to_string()))?;
        let counterpart = reply.thread().counterpart.clone();

        if self.config.dry_run {
            internal!(level = INFO, to = %counterpart, "Dry run, reply not sent");
            return Ok(Response::data(ResponseData::Message(format!(
                "Dry run: reply to {counterpart} not sent"
            ))));
        }

        let Some(credential) = self
            .collaborators
            .identities
            .resolve(&reply.thread().account)
            .await
        else {
            return Err(ControlError::ServerError(format!(
                "No credential for {}",
                reply.thread().account
            )));
        };

        let message = reply.into_message(&self.config.display_name);
        self.collaborators
            .transport
            .send(&credential, &message)
            .await
            .map_err(|e| {
                tracing::warn!(to = %counterpart, error = %e, "Reply failed");
                ControlError::ServerError(e.summary())
            })?;

        outgoing!(level = INFO, from = %credential.account(), to = %counterpart, "Reply sent");
        Ok(Response::data(ResponseData::Message(format!(
            "Reply sent to {counterpart}"
        ))))
    }
}
