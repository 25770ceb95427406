//! The round-robin dispatch loop
//!
//! One background task per run. Each round visits every sender in configured
//! order and gives each at most one send. The loop ends when a round produces
//! no send (`Completed`) or a stop is requested (`Cancelled`).
//!
//! Stop requests are checked:
//! - at the top of every round
//! - before every sender's turn and again while pacing its send
//! - every [`crate::governor::WAIT_INCREMENT`] during the inter-round wait
//!
//! A send that has started always runs to completion, ledger update
//! included, before the next check.

use std::sync::Arc;

use simplemerge_common::{audit, internal, tracing};

use crate::{
    config::CampaignConfig,
    governor::{RateGovernor, Wait, delay_for_round, wait_cancellable},
    ledger::DedupLedger,
    processor::setup::Prepared,
    progress::{RecipientOutcome, SenderStatus},
    queue::SenderQueue,
    run::{RunHandle, RunPhase},
    service::MailTransport,
    template::Template,
};

/// Outcome of one sender's turn within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    /// A send was attempted (successful, simulated or failed)
    Active,
    /// Nothing left for this sender
    Idle,
    /// A stop was requested before the send started
    Cancelled,
}

pub(super) struct Dispatch {
    pub(super) handle: RunHandle,
    pub(super) config: CampaignConfig,
    pub(super) template: Template,
    pub(super) ledger: DedupLedger,
    pub(super) queues: Vec<SenderQueue>,
    pub(super) governor: RateGovernor,
    pub(super) transport: Arc<dyn MailTransport>,
    pub(super) round: u64,
}

impl Dispatch {
    pub(super) fn new(
        handle: RunHandle,
        config: CampaignConfig,
        prepared: Prepared,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            governor: RateGovernor::new(config.min_send_interval()),
            handle,
            config,
            template: prepared.template,
            ledger: prepared.ledger,
            queues: prepared.queues,
            transport,
            round: 0,
        }
    }

    /// Drive the run to a terminal phase.
    pub(super) async fn run(mut self) -> RunPhase {
        let run_id = self.handle.run_id();
        internal!(level = INFO, run_id = %run_id, senders = self.queues.len(), "Dispatch loop started");

        let phase = self.rounds().await;

        let progress = self.handle.progress();
        if phase == RunPhase::Cancelled {
            progress.mark_cancelled();
        }
        self.handle.state.transition(phase);

        internal!(
            level = INFO,
            run_id = %run_id,
            phase = %phase,
            sent = progress.total_sent(),
            goal = progress.total_goal(),
            rounds = progress.rounds(),
            "Dispatch loop finished"
        );
        audit::log_campaign_finished(
            &run_id,
            &phase.to_string(),
            progress.total_sent(),
            progress.total_goal(),
            progress.rounds(),
        );

        phase
    }

    async fn rounds(&mut self) -> RunPhase {
        loop {
            if self.handle.stop_flag().is_requested() {
                return RunPhase::Cancelled;
            }

            self.round += 1;
            let mut round_active = false;

            for index in 0..self.queues.len() {
                if self.handle.stop_flag().is_requested() {
                    return RunPhase::Cancelled;
                }

                match self.turn(index).await {
                    Turn::Active => round_active = true,
                    Turn::Idle => {}
                    Turn::Cancelled => return RunPhase::Cancelled,
                }
            }

            if !round_active {
                return RunPhase::Completed;
            }

            let rounds = self.handle.progress().increment_rounds();
            internal!(level = DEBUG, round = rounds, "Round complete");

            self.settle_queues();
            if !self.queues.iter().any(SenderQueue::has_capacity) {
                return RunPhase::Completed;
            }

            let delay = delay_for_round(self.config.round_delay(), self.config.round_jitter());
            let progress = self.handle.progress();
            let wait = wait_cancellable(delay, self.handle.stop_flag(), |remaining| {
                let secs = u64::try_from(remaining.as_millis().div_ceil(1_000)).unwrap_or(u64::MAX);
                progress.set_countdown(secs);
            })
            .await;

            if wait == Wait::Cancelled {
                return RunPhase::Cancelled;
            }
        }
    }

    /// Give the sender at `index` its turn for this round.
    async fn turn(&mut self, index: usize) -> Turn {
        let subject = self.template.subject.as_str();
        let queue = &mut self.queues[index];
        let sender = Arc::clone(queue.sender());

        if !queue.has_capacity() {
            self.mark_exhausted(&sender);
            return Turn::Idle;
        }

        let pending = queue.next_pending(&self.ledger, subject);
        self.report_skipped(&sender, &pending.skipped);

        let Some(recipient) = pending.recipient else {
            self.mark_exhausted(&sender);
            return Turn::Idle;
        };

        if self.governor.pace(&sender, self.handle.stop_flag()).await == Wait::Cancelled {
            return Turn::Cancelled;
        }

        self.send(index, recipient).await;
        Turn::Active
    }

    /// Skip ledger hits at the head of each queue and label any queue that
    /// has run dry, so the countdown is only shown for senders with work left.
    fn settle_queues(&mut self) {
        let subject = self.template.subject.as_str();
        let mut settled = Vec::new();

        for queue in &mut self.queues {
            let skipped = queue.skip_known(&self.ledger, subject);
            settled.push((Arc::clone(queue.sender()), skipped, queue.has_capacity()));
        }

        for (sender, skipped, has_capacity) in settled {
            self.report_skipped(&sender, &skipped);
            if !has_capacity {
                self.mark_exhausted(&sender);
            }
        }
    }

    fn report_skipped(&self, sender: &str, skipped: &[String]) {
        if skipped.is_empty() {
            return;
        }

        let progress = self.handle.progress();
        let run_id = self.handle.run_id();
        for address in skipped {
            tracing::debug!(sender, recipient = %address, "Already contacted, skipping");
            progress.record_outcome(sender, address, RecipientOutcome::Skipped);
            audit::log_recipient_skipped(&run_id, sender, address);
        }
        progress.set_status(sender, SenderStatus::Skipped);
    }

    fn mark_exhausted(&self, sender: &str) {
        let progress = self.handle.progress();
        if progress
            .status(sender)
            .is_some_and(|status| status.accepts_countdown())
        {
            progress.set_status(sender, SenderStatus::Exhausted);
        }
    }
}
