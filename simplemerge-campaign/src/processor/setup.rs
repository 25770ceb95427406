//! Run preparation: template, ledger, credentials and queues

use std::sync::Arc;

use simplemerge_common::{incoming, tracing};

use crate::{
    config::CampaignConfig,
    error::SetupError,
    ledger::DedupLedger,
    processor::Collaborators,
    progress::SenderStatus,
    queue::SenderQueue,
    run::RunHandle,
    template::Template,
};

/// Everything the dispatch loop needs, loaded before the first send.
pub(super) struct Prepared {
    pub(super) template: Template,
    pub(super) ledger: DedupLedger,
    pub(super) queues: Vec<SenderQueue>,
}

/// Load the template and ledger and build one queue per usable sender.
///
/// Senders whose credential cannot be resolved are reported as
/// `Auth failed` and left out of the run.
pub(super) async fn prepare(
    collaborators: &Collaborators,
    config: &CampaignConfig,
    handle: &RunHandle,
) -> Result<Prepared, SetupError> {
    let progress = handle.progress();

    let template = collaborators
        .templates
        .fetch_template(&config.template)
        .await?;
    incoming!(level = DEBUG, reference = %config.template, subject = %template.subject, "Fetched template");
    progress.set_subject(&template.subject);

    let active: Vec<_> = config.active_senders().collect();
    for (sender, _) in &active {
        progress.register(&Arc::from(sender.address.trim()));
    }

    let ledger = DedupLedger::load(
        Arc::clone(&collaborators.ledger),
        config.ledger_retry.clone(),
    )
    .await;

    let mut queues = Vec::with_capacity(active.len());
    for (sender, source) in active {
        let address: Arc<str> = Arc::from(sender.address.trim());

        let Some(credential) = collaborators.identities.resolve(&address).await else {
            tracing::warn!(sender = %address, "No usable credential, sender excluded from run");
            progress.set_status(&address, SenderStatus::AuthFailed);
            continue;
        };

        let recipients = match collaborators.ledger.read_recipients(&source).await {
            Ok(recipients) => recipients,
            Err(err) => {
                tracing::warn!(
                    sender = %address,
                    source = %source,
                    error = %err,
                    "Unable to read recipients, sender has nothing to send"
                );
                Vec::new()
            }
        };
        incoming!(
            level = DEBUG,
            sender = %address,
            source = %source,
            recipients = recipients.len(),
            "Loaded recipients"
        );

        queues.push(SenderQueue::new(
            address,
            credential,
            recipients,
            config.max_per_sender,
        ));
    }

    if queues.is_empty() {
        return Err(SetupError::NoUsableSenders);
    }

    progress.set_goal(queues.iter().map(SenderQueue::goal).sum());

    Ok(Prepared {
        template,
        ledger,
        queues,
    })
}
