//! A single send within a sender's turn

use std::{sync::Arc, time::Instant};

use simplemerge_common::{audit, outgoing, tracing};

use crate::{
    processor::dispatch::Dispatch,
    progress::{RecipientOutcome, SenderStatus},
    template::Personalization,
    types::{OutgoingMessage, Recipient},
};

impl Dispatch {
    /// Render, send and record one message for the sender at `index`.
    ///
    /// Transport failures are contained here: the recipient is marked as
    /// errored, the cursor still advances and the loop moves on. Returns
    /// whether the send counted towards the sender's allowance.
    pub(super) async fn send(&mut self, index: usize, recipient: Recipient) -> bool {
        let run_id = self.handle.run_id();
        let sender = Arc::clone(self.queues[index].sender());
        let progress = self.handle.progress();

        progress.set_target(&sender, &recipient.address);
        progress.set_status(&sender, SenderStatus::Sending);
        audit::log_send_attempt(&run_id, &sender, &recipient.address, self.round);

        let personalization = Personalization::for_recipient(&recipient, &self.config.defaults);
        let message = OutgoingMessage::new(
            sender.as_ref(),
            self.config.display_name.as_str(),
            recipient.address.as_str(),
            self.template.render_subject(&personalization),
            self.template.render(&personalization),
        );

        let started = Instant::now();
        let success = if self.config.dry_run {
            outgoing!(level = DEBUG, sender = %sender, recipient = %recipient.address, "Simulated send");
            progress.set_status(&sender, SenderStatus::Simulated);
            progress.record_outcome(&sender, &recipient.address, RecipientOutcome::Simulated);
            audit::log_send_success(
                &run_id,
                &sender,
                &recipient.address,
                true,
                started.elapsed().as_millis(),
            );
            true
        } else {
            let credential = self.queues[index].credential().clone();
            match self.transport.send(&credential, &message).await {
                Ok(()) => {
                    outgoing!(level = INFO, sender = %sender, recipient = %recipient.address, "Sent");

                    if let Err(err) = self
                        .ledger
                        .record(&recipient.address, &self.template.subject, &sender)
                        .await
                    {
                        progress.increment_ledger_failures();
                        audit::log_ledger_write_failure(&run_id, &recipient.address, &err.to_string());
                    }

                    progress.set_status(&sender, SenderStatus::Sent);
                    progress.record_outcome(&sender, &recipient.address, RecipientOutcome::Sent);
                    audit::log_send_success(
                        &run_id,
                        &sender,
                        &recipient.address,
                        false,
                        started.elapsed().as_millis(),
                    );
                    true
                }
                Err(err) => {
                    let reason = err.summary();
                    tracing::warn!(
                        sender = %sender,
                        recipient = %recipient.address,
                        error = %err,
                        "Send failed, moving on"
                    );
                    progress.set_status(&sender, SenderStatus::Errored(reason.clone()));
                    progress.record_outcome(
                        &sender,
                        &recipient.address,
                        RecipientOutcome::Errored(reason),
                    );
                    audit::log_send_failure(&run_id, &sender, &recipient.address, &err.to_string());
                    false
                }
            }
        };

        self.queues[index].advance(success);
        if success {
            progress.increment_sent(&sender);
        }
        self.governor.record_send(&sender);

        success
    }
}
