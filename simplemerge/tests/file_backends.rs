use std::{path::Path, sync::Arc};

use pretty_assertions::assert_eq;
use simplemerge::{
    backends::{FileLedger, PickupTransport, TemplateDirectory, TokenDirectory},
    config::DaemonConfig,
};
use simplemerge_campaign::{
    Campaign, CampaignConfig, Collaborators, Launched, RunPhase, SenderConfig,
};

const TEMPLATE: &str = "Subject: Opening at {company}\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>Hi {first_name}, we are hiring for {job_title}.</p>\r\n";

struct Workspace {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        for sub in ["tokens", "templates", "recipients"] {
            std::fs::create_dir_all(root.join(sub)).unwrap();
        }

        std::fs::write(root.join("templates/outreach.eml"), TEMPLATE).unwrap();
        std::fs::write(
            root.join("tokens/TOKEN_A_X_COM.json"),
            r#"{"access_token": "token-a"}"#,
        )
        .unwrap();
        std::fs::write(
            root.join("tokens/TOKEN_B_X_COM.json"),
            r#"{"access_token": "token-b"}"#,
        )
        .unwrap();
        std::fs::write(
            root.join("recipients/filter0.csv"),
            "email,company,job_title\njane@y.com,Acme,Engineer\n",
        )
        .unwrap();
        std::fs::write(
            root.join("recipients/filter1.csv"),
            "bob@z.com,\"Widgets, Inc\",\n",
        )
        .unwrap();

        Self { _dir: dir, root }
    }

    fn path(&self, sub: &str) -> std::path::PathBuf {
        self.root.join(sub)
    }

    fn campaign(&self) -> Campaign {
        Campaign::new(Collaborators {
            identities: Arc::new(TokenDirectory::new(self.path("tokens"))),
            templates: Arc::new(TemplateDirectory::new(self.path("templates"))),
            ledger: Arc::new(FileLedger::new(
                self.path("recipients"),
                self.path("logs/sent.tsv"),
            )),
            transport: Arc::new(PickupTransport::new(self.path("pickup"))),
        })
    }
}

fn config(dry_run: bool) -> CampaignConfig {
    CampaignConfig {
        senders: vec![SenderConfig::new("a@x.com"), SenderConfig::new("b@x.com")],
        max_per_sender: 5,
        round_delay_secs: 5,
        round_jitter_secs: 1,
        dry_run,
        template: "outreach".to_string(),
        ..CampaignConfig::default()
    }
}

async fn run_to_end(campaign: &Campaign, config: CampaignConfig) -> simplemerge_campaign::ProgressSnapshot {
    let handle = match campaign.launch(config).await {
        Ok(Launched::Started(handle)) => handle,
        other => panic!("expected a new run, got {other:?}"),
    };
    handle.wait().await;
    handle.poll_progress()
}

fn pickup_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<_> = entries
        .map(|entry| std::fs::read_to_string(entry.unwrap().path()).unwrap())
        .collect();
    files.sort();
    files
}

#[tokio::test(start_paused = true)]
async fn live_run_writes_messages_and_sent_log() {
    let workspace = Workspace::new();

    let progress = run_to_end(&workspace.campaign(), config(false)).await;
    assert_eq!(progress.phase, RunPhase::Completed);
    assert_eq!(progress.total_sent, 2);
    assert_eq!(progress.ledger_failures, 0);

    let messages = pickup_files(&workspace.path("pickup"));
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().any(|m| m.contains("To: jane@y.com\r\n")));
    assert!(messages.iter().any(|m| m.contains("To: bob@z.com\r\n")));

    let log = std::fs::read_to_string(workspace.path("logs/sent.tsv")).unwrap();
    let mut rows: Vec<Vec<&str>> = log.lines().map(|l| l.split('\t').collect()).collect();
    rows.sort();
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][..3], ["bob@z.com", "Opening at {company}", "b@x.com"]);
    assert_eq!(&rows[1][..3], ["jane@y.com", "Opening at {company}", "a@x.com"]);
}

#[tokio::test(start_paused = true)]
async fn second_run_skips_everyone_already_contacted() {
    let workspace = Workspace::new();

    run_to_end(&workspace.campaign(), config(false)).await;
    let progress = run_to_end(&workspace.campaign(), config(false)).await;

    assert_eq!(progress.phase, RunPhase::Completed);
    assert_eq!(progress.total_sent, 0);
    assert_eq!(pickup_files(&workspace.path("pickup")).len(), 2);

    let log = std::fs::read_to_string(workspace.path("logs/sent.tsv")).unwrap();
    assert_eq!(log.lines().count(), 2);
}

#[tokio::test(start_paused = true)]
async fn dry_run_leaves_no_trace() {
    let workspace = Workspace::new();

    let progress = run_to_end(&workspace.campaign(), config(true)).await;

    assert_eq!(progress.phase, RunPhase::Completed);
    assert_eq!(progress.total_sent, 2);
    assert!(pickup_files(&workspace.path("pickup")).is_empty());
    assert!(!workspace.path("logs/sent.tsv").exists());
}

#[test]
fn daemon_config_points_backends_at_a_workspace() {
    let config = DaemonConfig::parse(
        r#"(
            campaign: (
                senders: [(address: "a@x.com"), (address: "b@x.com")],
                template: "outreach",
                dry_run: false,
            ),
            backends: (
                token_dir: "/srv/merge/tokens",
                template_dir: "/srv/merge/templates",
                recipient_dir: "/srv/merge/recipients",
                sent_log: "/srv/merge/sent.tsv",
            ),
            transport: Pickup(path: "/srv/merge/pickup"),
        )"#,
    )
    .unwrap();

    assert_eq!(config.campaign.active_senders().count(), 2);
    assert!(!config.campaign.dry_run);
    assert_eq!(config.backends.sent_log, Path::new("/srv/merge/sent.tsv"));
}
