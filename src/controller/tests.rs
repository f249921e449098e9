use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use super::*;
use crate::api::NextStep;
use crate::chat::{EntryKind, Segment};

const RUBRIC: &str = "Score the attached proposal on six criteria.";

#[derive(Default)]
struct FakeBackend {
    replies: Mutex<VecDeque<Result<ChatReply, String>>>,
    requests: Mutex<Vec<ChatRequest>>,
    deleted: Mutex<Vec<SubjectId>>,
    fail_delete: bool,
}

impl FakeBackend {
    fn failing_delete() -> Self {
        Self {
            fail_delete: true,
            ..Self::default()
        }
    }

    fn reply(&self, reply: Result<ChatReply, String>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn send_chat(&self, request: ChatRequest) -> Result<ChatReply> {
        self.requests.lock().unwrap().push(request);
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(error)) => Err(anyhow::anyhow!(error)),
            None => Ok(text_reply("<p>ok</p>")),
        }
    }

    async fn delete_user(&self, subject_id: &SubjectId) -> Result<()> {
        self.deleted.lock().unwrap().push(subject_id.clone());
        if self.fail_delete {
            anyhow::bail!("503 Service Unavailable");
        }
        Ok(())
    }
}

fn text_reply(response: &str) -> ChatReply {
    ChatReply {
        response: response.to_string(),
        display_name: None,
        next_step: None,
    }
}

fn subject() -> SubjectId {
    SubjectId::parse("0912345678").unwrap()
}

struct Harness {
    _dir: TempDir,
    path: std::path::PathBuf,
    backend: Arc<FakeBackend>,
    controller: ChatController,
}

fn config() -> ChatClientConfig {
    ChatClientConfig {
        attachment_default_prompt: Some(RUBRIC.to_string()),
        ..ChatClientConfig::default()
    }
}

fn harness_with(backend: FakeBackend, stored: Option<SessionRecord>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.toml");
    let store = SessionStore::new(Some(path.clone()));
    if let Some(record) = stored {
        store.save(&record).unwrap();
    }
    let backend = Arc::new(backend);
    let controller = ChatController::new(config(), backend.clone(), Handle::current(), store);
    Harness {
        _dir: dir,
        path,
        backend,
        controller,
    }
}

fn fresh() -> Harness {
    harness_with(FakeBackend::default(), None)
}

fn ready_session() -> Harness {
    harness_with(
        FakeBackend::default(),
        Some(SessionRecord {
            subject_id: Some(subject()),
            display_name: Some("Ana Pérez".to_string()),
            started_at: Some(Utc::now()),
            policies_accepted: true,
        }),
    )
}

/// Applies the next non-tick event.
async fn settle(controller: &mut ChatController) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), controller.next_event())
            .await
            .expect("controller event")
            .expect("channel open");
        let is_tick = matches!(event, ControllerEvent::Tick { .. });
        controller.handle_event(event);
        if !is_tick {
            return;
        }
    }
}

fn last_user_line(controller: &ChatController) -> String {
    let entry = controller
        .transcript()
        .entries()
        .iter()
        .rev()
        .find(|entry| entry.role == Role::User)
        .unwrap();
    match entry.segments() {
        [Segment::Text(text)] => text.clone(),
        other => panic!("unexpected segments {other:?}"),
    }
}

#[tokio::test]
async fn invalid_ids_are_rejected_and_chat_stays_disabled() {
    let mut h = fresh();
    assert_eq!(h.controller.stage(), GateStage::AwaitingSubjectId);
    assert!(!h.controller.composer_enabled());
    assert!(!h.controller.attachment_enabled());

    for raw in ["", "12345", "09123456789", "abcdefghij"] {
        h.controller.drafts.subject_id = raw.to_string();
        h.controller.submit_subject_id();
        assert_eq!(
            h.controller.alert(),
            Some(ValidationError::InvalidSubjectId.to_string().as_str())
        );
        assert!(h.controller.blocks_input());
        h.controller.dismiss_alert();
        assert!(!h.controller.blocks_input());
        assert_eq!(h.controller.stage(), GateStage::AwaitingSubjectId);
        assert!(!h.controller.composer_enabled());
    }

    tokio::task::yield_now().await;
    assert!(h.backend.requests().is_empty());
    assert!(!h.path.exists());
}

#[tokio::test]
async fn valid_id_is_persisted_and_probes_the_backend() {
    let mut h = fresh();
    h.controller.drafts.subject_id = " 0912345678 ".to_string();
    h.controller.submit_subject_id();

    assert_eq!(h.controller.stage(), GateStage::Probing);
    assert!(h.controller.transcript().is_composing());
    assert!(h.controller.drafts.subject_id.is_empty());
    assert_eq!(
        SessionStore::new(Some(h.path.clone())).load().subject_id,
        Some(subject())
    );

    settle(&mut h.controller).await;
    let requests = h.backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].message, "ping");
    assert!(!requests[0].manual_input);
    assert!(!h.controller.transcript().is_composing());
}

#[tokio::test]
async fn probe_reply_with_known_name_starts_session_and_asks_consent() {
    let mut h = fresh();
    h.backend.reply(Ok(ChatReply {
        response: "<p>Hola de nuevo, Ana</p>".to_string(),
        display_name: Some("Ana Pérez".to_string()),
        next_step: Some(NextStep::Chat),
    }));
    h.controller.drafts.subject_id = "0912345678".to_string();
    h.controller.submit_subject_id();
    settle(&mut h.controller).await;

    assert_eq!(h.controller.stage(), GateStage::AwaitingPolicy);
    assert!(h.controller.timer_running());
    assert!(h.controller.take_cue());
    assert!(!h.controller.composer_enabled());

    h.controller.accept_policy();
    assert_eq!(h.controller.stage(), GateStage::Ready);
    assert!(h.controller.composer_enabled());

    let stored = SessionStore::new(Some(h.path.clone())).load();
    assert_eq!(stored.display_name.as_deref(), Some("Ana Pérez"));
    assert!(stored.started_at.is_some());
    assert!(stored.policies_accepted);
}

#[tokio::test]
async fn name_collection_requires_two_tokens() {
    let mut h = fresh();
    h.backend.reply(Ok(ChatReply {
        response: "<p>¿Cuál es tu nombre completo?</p>".to_string(),
        display_name: None,
        next_step: Some(NextStep::AskName),
    }));
    h.controller.drafts.subject_id = "0912345678".to_string();
    h.controller.submit_subject_id();
    settle(&mut h.controller).await;
    assert_eq!(h.controller.stage(), GateStage::AwaitingName);

    h.controller.drafts.full_name = "Ana".to_string();
    h.controller.submit_name();
    assert_eq!(
        h.controller.alert(),
        Some(ValidationError::IncompleteName.to_string().as_str())
    );
    assert_eq!(h.controller.stage(), GateStage::AwaitingName);
    assert!(!h.controller.timer_running());

    h.controller.dismiss_alert();
    h.controller.drafts.full_name = "Ana  Pérez".to_string();
    h.controller.submit_name();
    assert_eq!(h.controller.stage(), GateStage::AwaitingPolicy);
    assert!(h.controller.timer_running());
    settle(&mut h.controller).await;

    let requests = h.backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].message, "Ana Pérez");
    assert_eq!(requests[1].stage, Some(ConversationStage::Name));
    assert_eq!(
        SessionStore::new(Some(h.path.clone())).load().display_name.as_deref(),
        Some("Ana Pérez")
    );
}

#[tokio::test]
async fn failed_probe_still_offers_name_entry() {
    let mut h = fresh();
    h.backend.reply(Err("connection refused".to_string()));
    h.controller.drafts.subject_id = "0912345678".to_string();
    h.controller.submit_subject_id();
    settle(&mut h.controller).await;

    assert_eq!(h.controller.stage(), GateStage::AwaitingName);
    let last = h.controller.transcript().entries().last().unwrap();
    assert_eq!(last.kind, EntryKind::Error);
    assert!(!h.controller.transcript().is_composing());
}

#[tokio::test]
async fn stored_session_resumes_ready() {
    let h = ready_session();
    assert_eq!(h.controller.stage(), GateStage::Ready);
    assert!(h.controller.timer_running());
    assert!(h.controller.countdown_label().is_some());
}

#[tokio::test]
async fn stored_expired_session_returns_to_gate() {
    let h = harness_with(
        FakeBackend::default(),
        Some(SessionRecord {
            subject_id: Some(subject()),
            display_name: Some("Ana Pérez".to_string()),
            started_at: Some(Utc::now() - chrono::Duration::minutes(11)),
            policies_accepted: true,
        }),
    );
    assert_eq!(h.controller.stage(), GateStage::AwaitingSubjectId);
    assert!(!h.controller.timer_running());
    assert!(h.controller.alert().is_some());
    assert!(!h.path.exists());
}

#[tokio::test]
async fn blank_submission_is_a_no_op() {
    let mut h = ready_session();
    h.controller.drafts.message = "   ".to_string();
    h.controller.submit_message();

    assert!(!h.controller.is_waiting());
    assert!(!h.controller.transcript().is_composing());
    tokio::task::yield_now().await;
    assert!(h.backend.requests().is_empty());
}

#[tokio::test]
async fn typed_message_round_trip() {
    let mut h = ready_session();
    h.backend.reply(Ok(text_reply(
        r#"<p>Mira <a href="https://ug.edu.ec">esto</a></p>"#,
    )));
    h.controller.drafts.message = "  hola  ".to_string();
    h.controller.submit_message();

    assert!(h.controller.drafts.message.is_empty());
    assert!(h.controller.transcript().is_composing());
    assert_eq!(last_user_line(&h.controller), "You: hola");

    settle(&mut h.controller).await;
    let request = &h.backend.requests()[0];
    assert_eq!(request.message, "hola");
    assert!(request.manual_input);
    assert_eq!(request.subject_id, subject());

    let last = h.controller.transcript().entries().last().unwrap();
    assert!(last.is_markup);
    assert_eq!(
        last.segments(),
        [
            Segment::Text("Mira ".to_string()),
            Segment::Link {
                text: "esto".to_string(),
                href: "https://ug.edu.ec".to_string(),
            },
        ]
    );
    assert!(h.controller.take_cue());
    assert!(!h.controller.take_cue());
}

#[tokio::test]
async fn attachment_only_sends_rubric_but_transcript_shows_file() {
    let mut h = ready_session();
    h.controller.drafts.message = "draft".to_string();
    h.controller
        .stage_attachment(PendingAttachment::new("pitch.pdf", b"%PDF-1.7".to_vec()));

    assert!(h.controller.is_attached());
    assert!(!h.controller.composer_enabled());
    assert!(h.controller.drafts.message.is_empty());

    h.controller.submit_message();
    assert!(!h.controller.is_attached());
    assert!(h.controller.composer_enabled());
    assert_eq!(last_user_line(&h.controller), "You (file): pitch.pdf");
    assert!(h
        .controller
        .transcript()
        .entries()
        .iter()
        .all(|entry| !entry.content.contains(RUBRIC)));

    settle(&mut h.controller).await;
    let request = &h.backend.requests()[0];
    assert_eq!(request.message, RUBRIC);
    assert!(!request.manual_input);
    assert_eq!(request.file.as_ref().unwrap().kind.field_name(), "pdf");
}

#[tokio::test]
async fn unsupported_file_is_rejected_on_submit() {
    let mut h = ready_session();
    h.controller
        .stage_attachment(PendingAttachment::new("slides.pptx", vec![1]));
    assert!(h.controller.composer_enabled());

    h.controller.submit_message();
    assert!(matches!(h.controller.alert(), Some(text) if text.contains("slides.pptx")));
    assert!(h.controller.is_attached());
    tokio::task::yield_now().await;
    assert!(h.backend.requests().is_empty());
}

#[tokio::test]
async fn overlapping_submission_is_rejected() {
    let mut h = ready_session();
    h.controller.drafts.message = "first".to_string();
    h.controller.submit_message();
    h.controller.drafts.message = "second".to_string();
    h.controller.submit_message();

    assert!(h.controller.status().is_some());
    assert_eq!(h.controller.drafts.message, "second");
    settle(&mut h.controller).await;
    assert_eq!(h.backend.requests().len(), 1);
}

#[tokio::test]
async fn failed_request_renders_error_and_clears_indicator() {
    let mut h = ready_session();
    h.backend.reply(Err("timed out".to_string()));
    h.controller.drafts.message = "hola".to_string();
    h.controller.submit_message();
    settle(&mut h.controller).await;

    assert!(!h.controller.transcript().is_composing());
    assert!(!h.controller.is_waiting());
    let last = h.controller.transcript().entries().last().unwrap();
    assert_eq!(last.kind, EntryKind::Error);
    assert!(!h.controller.take_cue());
}

#[tokio::test]
async fn countdown_reaching_zero_forces_logout() {
    let mut h = ready_session();
    let started = h.controller.record().started_at.unwrap();
    let generation = h.controller.generation;

    h.controller.handle_event(ControllerEvent::Tick {
        generation,
        now: started + chrono::Duration::minutes(10),
    });

    assert!(!h.path.exists());
    assert!(h.controller.record().is_empty());
    assert_eq!(h.controller.stage(), GateStage::AwaitingSubjectId);
    assert!(!h.controller.timer_running());
    assert!(h.controller.alert().is_some());
    assert!(!h.controller.wants_extension());
}

#[tokio::test]
async fn warning_prompts_once_and_extension_resets_start() {
    let mut h = ready_session();
    let started = h.controller.record().started_at.unwrap();
    let generation = h.controller.generation;
    let tick = |secs: i64| ControllerEvent::Tick {
        generation,
        now: started + chrono::Duration::seconds(secs),
    };

    h.controller.handle_event(tick(8 * 60));
    assert!(h.controller.wants_extension());
    h.controller.decline_extension();
    h.controller.handle_event(tick(8 * 60 + 1));
    assert!(!h.controller.wants_extension());
    assert!(matches!(h.controller.countdown_label(), Some((_, true))));

    h.controller.accept_extension_at(started + chrono::Duration::seconds(9 * 60));
    let extended = h.controller.record().started_at.unwrap();
    assert_eq!(extended, started + chrono::Duration::seconds(9 * 60));
    assert_eq!(
        SessionStore::new(Some(h.path.clone())).load().started_at,
        Some(extended)
    );
    assert!(matches!(h.controller.countdown_label(), Some((_, false))));
}

#[tokio::test]
async fn stale_ticks_are_ignored() {
    let mut h = ready_session();
    let started = h.controller.record().started_at.unwrap();
    h.controller.handle_event(ControllerEvent::Tick {
        generation: h.controller.generation + 7,
        now: started + chrono::Duration::minutes(30),
    });
    assert_eq!(h.controller.stage(), GateStage::Ready);
}

async fn reject_policy_with(backend: FakeBackend) -> Harness {
    let mut h = harness_with(
        backend,
        Some(SessionRecord {
            subject_id: Some(subject()),
            display_name: Some("Ana Pérez".to_string()),
            started_at: Some(Utc::now()),
            policies_accepted: false,
        }),
    );
    assert_eq!(h.controller.stage(), GateStage::AwaitingPolicy);
    h.controller.reject_policy();
    settle(&mut h.controller).await;
    h
}

#[tokio::test]
async fn policy_rejection_disables_everything_when_delete_succeeds() {
    let mut h = reject_policy_with(FakeBackend::default()).await;
    assert_eq!(h.controller.stage(), GateStage::Terminated);
    assert!(!h.controller.composer_enabled());
    assert!(!h.controller.attachment_enabled());
    assert!(!h.controller.timer_running());
    assert!(!h.path.exists());
    assert_eq!(h.backend.deleted.lock().unwrap().as_slice(), &[subject()]);
    let notice = h.controller.transcript().entries().last().unwrap().content.clone();
    assert!(notice.contains("has been deleted"));

    h.controller.logout();
    h.controller.drafts.message = "hola".to_string();
    h.controller.submit_message();
    assert_eq!(h.controller.stage(), GateStage::Terminated);
}

#[tokio::test]
async fn policy_rejection_disables_everything_when_delete_fails() {
    let h = reject_policy_with(FakeBackend::failing_delete()).await;
    assert_eq!(h.controller.stage(), GateStage::Terminated);
    assert!(!h.controller.composer_enabled());
    assert!(!h.controller.attachment_enabled());
    assert!(!h.path.exists());
    let notice = h.controller.transcript().entries().last().unwrap().content.clone();
    assert!(notice.contains("could not confirm"));
}

#[tokio::test]
async fn logout_drops_replies_from_the_old_session() {
    let mut h = ready_session();
    h.controller.drafts.message = "hola".to_string();
    h.controller.submit_message();
    h.controller.logout();

    assert_eq!(h.controller.stage(), GateStage::AwaitingSubjectId);
    assert!(!h.path.exists());
    let entries_after_logout = h.controller.transcript().entries().len();

    settle(&mut h.controller).await;
    assert_eq!(h.controller.transcript().entries().len(), entries_after_logout);
    assert!(!h.controller.take_cue());
}

fn reply_with(
    response: &str,
    display_name: Option<&str>,
    next_step: Option<NextStep>,
) -> ChatReply {
    ChatReply {
        response: response.to_string(),
        display_name: display_name.map(str::to_string),
        next_step,
    }
}

async fn register_subject(h: &mut Harness) {
    h.controller.drafts.subject_id = "0912345678".to_string();
    h.controller.submit_subject_id();
    settle(&mut h.controller).await;
}

#[tokio::test]
async fn probe_marker_phrase_opens_name_prompt() {
    let mut h = fresh();
    h.backend.reply(Ok(text_reply("<p>¿Cuál es tu <b>Nombre Completo</b>?</p>")));
    register_subject(&mut h).await;

    assert_eq!(h.controller.stage(), GateStage::AwaitingName);
    assert!(!h.controller.composer_enabled());
}

#[tokio::test]
async fn structured_step_wins_over_marker_phrases() {
    let mut h = fresh();
    h.backend.reply(Ok(reply_with(
        "<p>Tu nombre completo ya no es necesario.</p>",
        None,
        Some(NextStep::Chat),
    )));
    register_subject(&mut h).await;

    assert_eq!(h.controller.stage(), GateStage::Ready);
    assert!(h.controller.record().display_name.is_none());
}

#[tokio::test]
async fn chat_opens_without_name_until_a_reply_asks_for_it() {
    let mut h = fresh();
    h.backend.reply(Ok(text_reply("<p>Bienvenido a INNOVUG</p>")));
    h.backend.reply(Ok(text_reply(
        "<p>Antes de seguir, escribe tu nombre completo.</p>",
    )));
    register_subject(&mut h).await;

    assert_eq!(h.controller.stage(), GateStage::Ready);
    assert!(h.controller.record().display_name.is_none());
    assert!(!h.controller.timer_running());
    assert!(h.controller.composer_enabled());

    h.controller.drafts.message = "quiero evaluar mi idea".to_string();
    h.controller.submit_message();
    settle(&mut h.controller).await;

    assert_eq!(h.controller.stage(), GateStage::AwaitingName);
    assert!(!h.controller.composer_enabled());
    assert_eq!(h.backend.requests()[1].message, "quiero evaluar mi idea");
}

#[tokio::test]
async fn chat_reply_with_known_name_starts_the_session() {
    let mut h = fresh();
    h.backend.reply(Ok(text_reply("<p>Bienvenido</p>")));
    h.backend.reply(Ok(reply_with(
        "<p>Hola Ana</p>",
        Some("Ana Pérez"),
        Some(NextStep::Chat),
    )));
    register_subject(&mut h).await;

    h.controller.drafts.message = "hola".to_string();
    h.controller.submit_message();
    settle(&mut h.controller).await;

    assert_eq!(h.controller.stage(), GateStage::AwaitingPolicy);
    assert!(h.controller.timer_running());
    assert_eq!(
        SessionStore::new(Some(h.path.clone())).load().display_name.as_deref(),
        Some("Ana Pérez")
    );
}

#[tokio::test]
async fn named_session_ignores_later_name_requests() {
    let mut h = ready_session();
    h.backend.reply(Ok(reply_with(
        "<p>Dime tu nombre completo</p>",
        None,
        Some(NextStep::AskName),
    )));
    h.controller.drafts.message = "hola".to_string();
    h.controller.submit_message();
    settle(&mut h.controller).await;

    assert_eq!(h.controller.stage(), GateStage::Ready);
}

#[tokio::test]
async fn unrecognised_next_step_still_renders_the_reply() {
    let mut h = ready_session();
    h.backend.reply(Ok(reply_with(
        "<p>Sube tu plan</p>",
        None,
        Some(NextStep::Unknown),
    )));
    h.controller.drafts.message = "hola".to_string();
    h.controller.submit_message();
    settle(&mut h.controller).await;

    let last = h.controller.transcript().entries().last().unwrap();
    assert_eq!(last.kind, EntryKind::Message);
    assert_eq!(last.segments(), [Segment::Text("Sube tu plan".to_string())]);
    assert_eq!(h.controller.stage(), GateStage::Ready);
}
