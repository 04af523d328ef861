//! Database-backed campaign tests with a scripted sender in place of the
//! real channel. Run with `DATABASE_URL=... cargo test -- --ignored`.

mod common;

use async_trait::async_trait;
use dispatch_service::models::{CampaignStatus, Contact, MessageStatus};
use dispatch_service::services::channel::SendOutcome;
use dispatch_service::services::dispatcher::{
    CampaignDispatcher, CampaignRequest, OutboundSender,
};
use dispatch_service::services::inbox::InboxService;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Succeeds for every recipient except the phones it is told to reject.
struct ScriptedSender {
    reject: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSender {
    fn new(reject: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            reject: reject.iter().map(|s| s.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn outcome_for(&self, to: &str) -> SendOutcome {
        self.calls.lock().unwrap().push(to.to_string());
        if self.reject.contains(to) {
            SendOutcome::Failed {
                reason: "Receiver incapable".into(),
                error_code: Some(131026),
            }
        } else {
            SendOutcome::Sent {
                message_id: format!("wamid.{}", Uuid::new_v4()),
            }
        }
    }
}

#[async_trait]
impl OutboundSender for ScriptedSender {
    async fn send_text(&self, to: &str, _body: &str) -> SendOutcome {
        self.outcome_for(to)
    }

    async fn send_template(
        &self,
        to: &str,
        _template_name: &str,
        _params: &[String],
        _language_code: &str,
    ) -> SendOutcome {
        self.outcome_for(to)
    }
}

fn contact(phone: &str, name: &str) -> Contact {
    Contact::from([("phone", phone), ("name", name)])
}

fn request(contacts: Vec<Contact>) -> CampaignRequest {
    CampaignRequest {
        name: format!("test-campaign-{}", Uuid::new_v4()),
        contacts,
        message_template: "Hi {name}!".into(),
        template_name: None,
        template_params: Vec::new(),
        language_code: "en".into(),
        delay_ms: None,
    }
}

fn dispatcher_with(
    pool: sqlx::Pool<sqlx::Postgres>,
    sender: Arc<ScriptedSender>,
    inbox: InboxService,
) -> CampaignDispatcher {
    CampaignDispatcher::new(pool, sender, inbox, Duration::ZERO, "91".into())
}

#[tokio::test]
#[ignore]
async fn failures_are_counted_not_fatal() {
    let pool = common::setup_pool().await;
    let inbox = InboxService::new(pool.clone());
    let sender = ScriptedSender::new(&["911111111111"]);
    let dispatcher = dispatcher_with(pool, sender.clone(), inbox.clone());

    let report = dispatcher
        .dispatch(
            request(vec![
                contact("912222222222", "Asha"),
                contact("911111111111", "Ravi"),
                contact("913333333333", "Meera"),
            ]),
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.successful, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.status, CampaignStatus::Completed);
    assert_eq!(sender.calls.lock().unwrap().len(), 3);

    let campaign = dispatcher.get_campaign(report.campaign_id).await.unwrap();
    assert_eq!(campaign.status, CampaignStatus::Completed);
    assert_eq!(campaign.successful_count, 2);
    assert_eq!(campaign.failed_count, 1);
    assert!(campaign.completed_at.is_some());

    // The failed recipient's row carries the rejection
    let failed = inbox.get_user_messages("911111111111", 5, 0).await.unwrap();
    let row = failed
        .iter()
        .find(|m| m.campaign_id == Some(report.campaign_id))
        .unwrap();
    assert_eq!(row.status, MessageStatus::Failed);
    assert_eq!(row.error_reason.as_deref(), Some("Receiver incapable"));
}

#[tokio::test]
#[ignore]
async fn invalid_contacts_count_as_failed_without_reaching_the_channel() {
    let pool = common::setup_pool().await;
    let inbox = InboxService::new(pool.clone());
    let sender = ScriptedSender::new(&[]);
    let dispatcher = dispatcher_with(pool, sender.clone(), inbox);

    let report = dispatcher
        .dispatch(
            request(vec![
                contact("912222222222", "Asha"),
                contact("", "no phone"),
                contact("123", "short"),
            ]),
            None,
        )
        .await
        .unwrap();

    // Counters always sum to the full input list
    assert_eq!(report.total, 3);
    assert_eq!(report.successful, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(report.successful + report.failed, report.total);
    assert_eq!(report.invalid.len(), 2);
    assert_eq!(report.status, CampaignStatus::Completed);
    // Only the valid recipient reached the channel
    assert_eq!(sender.calls.lock().unwrap().len(), 1);

    let campaign = dispatcher.get_campaign(report.campaign_id).await.unwrap();
    assert_eq!(campaign.total_contacts, 3);
    assert_eq!(campaign.successful_count, 1);
    assert_eq!(campaign.failed_count, 2);
}

#[tokio::test]
#[ignore]
async fn empty_recipient_list_finishes_failed() {
    let pool = common::setup_pool().await;
    let inbox = InboxService::new(pool.clone());
    let sender = ScriptedSender::new(&[]);
    let dispatcher = dispatcher_with(pool, sender.clone(), inbox);

    let report = dispatcher.dispatch(request(Vec::new()), None).await.unwrap();

    // Nothing attempted: the terminal status is failed
    assert_eq!(report.total, 0);
    assert_eq!(report.status, CampaignStatus::Failed);
    assert!(sender.calls.lock().unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn progress_is_reported_per_recipient() {
    let pool = common::setup_pool().await;
    let inbox = InboxService::new(pool.clone());
    let sender = ScriptedSender::new(&[]);
    let dispatcher = dispatcher_with(pool, sender, inbox);

    let ticks = Arc::new(AtomicU32::new(0));
    let seen = ticks.clone();
    let report = dispatcher
        .dispatch(
            request(vec![
                contact("914444444444", "A"),
                contact("915555555555", "B"),
            ]),
            Some(Box::new(move |_, progress| {
                seen.fetch_add(1, Ordering::SeqCst);
                assert!(progress.processed <= progress.total);
                assert_eq!(progress.successful + progress.failed, progress.processed);
            })),
        )
        .await
        .unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(ticks.load(Ordering::SeqCst), 2);
}

#[tokio::test]
#[ignore]
async fn bare_local_phones_are_normalized_before_persisting() {
    let pool = common::setup_pool().await;
    let inbox = InboxService::new(pool.clone());
    let sender = ScriptedSender::new(&[]);
    let dispatcher = dispatcher_with(pool, sender.clone(), inbox.clone());

    // 10-digit local number, unique per run
    let local = format!("98{:08}", Uuid::new_v4().as_u128() % 100_000_000);
    let qualified = format!("91{local}");

    let report = dispatcher
        .dispatch(request(vec![contact(&local, "Asha")]), None)
        .await
        .unwrap();
    assert_eq!(report.successful, 1);

    // The channel and the database both see the fully qualified number, so
    // an inbound reply folds into the same conversation
    assert_eq!(sender.calls.lock().unwrap()[0], qualified);
    let rows = inbox.get_user_messages(&qualified, 5, 0).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(inbox.get_user_messages(&local, 5, 0).await.unwrap().is_empty());

    let conversation = inbox.get_conversation(&qualified).await.unwrap();
    assert_eq!(conversation.total_messages, 1);
}

#[tokio::test]
#[ignore]
async fn unrecorded_sends_count_as_failed() {
    let pool = common::setup_pool().await;
    // Message rows go through a pool that is already closed, so every
    // persistence attempt errors while campaign bookkeeping still works
    let dead_pool = common::setup_pool().await;
    dead_pool.close().await;
    let inbox = InboxService::new(dead_pool);
    let sender = ScriptedSender::new(&[]);
    let dispatcher = dispatcher_with(pool, sender.clone(), inbox);

    let report = dispatcher
        .dispatch(
            request(vec![
                contact("916666666666", "Asha"),
                contact("917777777777", "Ravi"),
            ]),
            None,
        )
        .await
        .unwrap();

    // The channel accepted both, but neither has a message row
    assert_eq!(sender.calls.lock().unwrap().len(), 2);
    assert_eq!(report.successful, 0);
    assert_eq!(report.failed, 2);
    assert_eq!(report.invalid.len(), 2);
    assert!(report.invalid[0].contains("not recorded"));

    let campaign = dispatcher.get_campaign(report.campaign_id).await.unwrap();
    assert_eq!(campaign.successful_count, 0);
    assert_eq!(campaign.failed_count, 2);
}

#[tokio::test]
#[ignore]
async fn per_campaign_delay_overrides_the_default() {
    let pool = common::setup_pool().await;
    let inbox = InboxService::new(pool.clone());
    let sender = ScriptedSender::new(&[]);
    let dispatcher = dispatcher_with(pool, sender, inbox);

    let mut slow = request(vec![
        contact("918888888888", "A"),
        contact("919999999999", "B"),
        contact("918899889988", "C"),
    ]);
    slow.delay_ms = Some(60);

    let started = std::time::Instant::now();
    let report = dispatcher.dispatch(slow, None).await.unwrap();
    // Two gaps between three recipients; none after the last
    assert!(started.elapsed() >= Duration::from_millis(120));
    assert_eq!(report.successful, 3);
}
