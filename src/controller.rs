//! Session-gated chat workflow.
//!
//! The controller owns every piece of mutable client state: the persisted
//! session record, the gate stage, the transcript, the staged attachment, the
//! countdown and the drafts bound to the input widgets. Network calls and
//! timer ticks run on the tokio runtime and report back through a channel;
//! their results are applied one at a time from [`ChatController::poll_events`]
//! on the UI thread.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use flume::{Receiver, Sender};
use tokio::runtime::Handle;

use crate::api::{ChatBackend, ChatReply, ChatRequest, ConversationStage};
use crate::chat::pipeline::{prepare_submission, probe_request, reply_requests_name};
use crate::chat::{AttachmentSlot, PendingAttachment, Role, Transcript};
use crate::config::ChatClientConfig;
use crate::session::{
    format_remaining, validate_full_name, Countdown, SessionRecord, SessionStore, SessionTimer,
    SubjectId, TickOutcome, ValidationError,
};

const WELCOME_TEXT: &str = "Hi, I'm INNOVUG, your assistant for building a successful venture.";
const SUBJECT_ID_REQUEST: &str = "To get started, please enter your 10-digit ID number.";
const EXPIRED_ALERT: &str = "Your session has expired. Please sign in again.";
const BUSY_NOTICE: &str = "Please wait for the current reply before sending another message.";
const REJECTED_OK: &str =
    "Your data has been deleted. You can close this window; chat is no longer available.";
const REJECTED_FAILED: &str =
    "We could not confirm the deletion of your data, but your local session has been removed. Chat is no longer available.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStage {
    /// Blocking prompt for the subject id.
    AwaitingSubjectId,
    /// Silent profile probe in flight.
    Probing,
    AwaitingName,
    AwaitingPolicy,
    /// Chat is open. The display name may still be unknown when the backend
    /// has not asked for it yet.
    Ready,
    /// Policy rejected. Nothing is re-enabled until restart.
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPurpose {
    Probe,
    Name,
    Message,
}

#[derive(Debug)]
pub enum ControllerEvent {
    ChatFinished {
        generation: u64,
        purpose: RequestPurpose,
        result: Result<ChatReply, String>,
    },
    DeleteFinished {
        result: Result<(), String>,
    },
    Tick {
        generation: u64,
        now: DateTime<Utc>,
    },
}

/// Text bound to the input widgets.
#[derive(Debug, Default, Clone)]
pub struct Drafts {
    pub subject_id: String,
    pub full_name: String,
    pub message: String,
}

pub struct ChatController {
    config: ChatClientConfig,
    backend: Arc<dyn ChatBackend>,
    runtime: Handle,
    store: SessionStore,
    record: SessionRecord,
    stage: GateStage,
    transcript: Transcript,
    attachments: AttachmentSlot,
    pub drafts: Drafts,
    countdown: Countdown,
    timer: SessionTimer,
    chat_in_flight: bool,
    /// Bumped on every teardown; late events from an older session are dropped.
    generation: u64,
    alert: Option<String>,
    status: Option<String>,
    extension_prompt: bool,
    pending_cue: bool,
    event_tx: Sender<ControllerEvent>,
    event_rx: Receiver<ControllerEvent>,
}

impl ChatController {
    pub fn new(
        config: ChatClientConfig,
        backend: Arc<dyn ChatBackend>,
        runtime: Handle,
        store: SessionStore,
    ) -> Self {
        let (event_tx, event_rx) = flume::unbounded();
        let countdown = Countdown::new(
            config.session_duration(),
            config.extension_duration(),
            config.warning_threshold(),
        );
        let mut controller = Self {
            config,
            backend,
            runtime,
            store,
            record: SessionRecord::default(),
            stage: GateStage::AwaitingSubjectId,
            transcript: Transcript::default(),
            attachments: AttachmentSlot::default(),
            drafts: Drafts::default(),
            countdown,
            timer: SessionTimer::new(),
            chat_in_flight: false,
            generation: 0,
            alert: None,
            status: None,
            extension_prompt: false,
            pending_cue: false,
            event_tx,
            event_rx,
        };
        controller.boot(Utc::now());
        controller
    }

    fn boot(&mut self, now: DateTime<Utc>) {
        self.record = self.store.load();
        self.transcript.push_text(Role::Assistant, WELCOME_TEXT);

        let Some(subject_id) = self.record.subject_id.clone() else {
            self.show_subject_id_gate();
            return;
        };

        match (self.record.display_name.clone(), self.record.started_at) {
            (None, _) => {
                tracing::info!(
                    "Resuming subject {} without a display name",
                    subject_id.masked()
                );
                self.send_probe(&subject_id);
            }
            (Some(name), Some(started_at)) => {
                if self.countdown.remaining_at(started_at, now).is_none() {
                    tracing::info!("Stored session expired while the client was closed");
                    self.clear_persisted();
                    self.alert = Some(EXPIRED_ALERT.to_string());
                    self.show_subject_id_gate();
                    return;
                }
                let greeting = format!("Welcome back, {name}.");
                self.transcript.push_text(Role::Assistant, &greeting);
                self.start_timer();
                self.gate_after_profile();
            }
            (Some(name), None) => {
                let greeting = format!("Welcome back, {name}.");
                self.transcript.push_text(Role::Assistant, &greeting);
                self.begin_session(now);
                self.gate_after_profile();
            }
        }
    }

    fn show_subject_id_gate(&mut self) {
        self.stage = GateStage::AwaitingSubjectId;
        self.transcript.push_text(Role::Assistant, SUBJECT_ID_REQUEST);
    }

    // ---- accessors used by the view -------------------------------------

    pub fn config(&self) -> &ChatClientConfig {
        &self.config
    }

    pub fn stage(&self) -> GateStage {
        self.stage
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn transcript_mut(&mut self) -> &mut Transcript {
        &mut self.transcript
    }

    pub fn attachment(&self) -> Option<&PendingAttachment> {
        self.attachments.staged()
    }

    pub fn is_attached(&self) -> bool {
        self.attachments.is_attached()
    }

    pub fn composer_enabled(&self) -> bool {
        self.stage == GateStage::Ready && !self.attachments.blocks_text()
    }

    pub fn attachment_enabled(&self) -> bool {
        self.stage == GateStage::Ready
    }

    pub fn is_waiting(&self) -> bool {
        self.chat_in_flight
    }

    pub fn timer_running(&self) -> bool {
        self.timer.is_running()
    }

    /// `("MM:SS", alert)` while a session countdown is active.
    pub fn countdown_label(&self) -> Option<(String, bool)> {
        if !self.timer.is_running() {
            return None;
        }
        let remaining = self.countdown.last_remaining().or_else(|| {
            self.record
                .started_at
                .and_then(|started| self.countdown.remaining_at(started, Utc::now()))
        })?;
        Some((format_remaining(remaining), self.countdown.is_alert()))
    }

    pub fn alert(&self) -> Option<&str> {
        self.alert.as_deref()
    }

    /// True while an alert is open; the rest of the window stays disabled.
    pub fn blocks_input(&self) -> bool {
        self.alert.is_some()
    }

    pub fn dismiss_alert(&mut self) {
        self.alert = None;
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn wants_extension(&self) -> bool {
        self.extension_prompt
    }

    /// True once per reply that should play the notification cue.
    pub fn take_cue(&mut self) -> bool {
        std::mem::take(&mut self.pending_cue)
    }

    // ---- identity gate ---------------------------------------------------

    pub fn submit_subject_id(&mut self) {
        if self.stage != GateStage::AwaitingSubjectId {
            return;
        }
        let subject_id = match SubjectId::parse(&self.drafts.subject_id) {
            Ok(id) => id,
            Err(error) => {
                tracing::debug!("Rejected subject id input");
                self.alert = Some(error.to_string());
                return;
            }
        };
        tracing::info!("Subject id registered: {}", subject_id.masked());
        self.drafts.subject_id.clear();
        self.record.subject_id = Some(subject_id.clone());
        self.persist();
        self.transcript
            .push_text(Role::User, &format!("ID registered: {subject_id}"));
        self.send_probe(&subject_id);
    }

    fn send_probe(&mut self, subject_id: &SubjectId) {
        self.stage = GateStage::Probing;
        let request = probe_request(subject_id, &self.config.probe_message);
        self.dispatch_chat(request, RequestPurpose::Probe);
    }

    // ---- profile collector -----------------------------------------------

    pub fn submit_name(&mut self) {
        if self.stage != GateStage::AwaitingName {
            return;
        }
        let Some(subject_id) = self.record.subject_id.clone() else {
            self.alert = Some(ValidationError::MissingSubjectId.to_string());
            return;
        };
        if self.chat_in_flight {
            self.status = Some(BUSY_NOTICE.to_string());
            return;
        }
        let name = match validate_full_name(&self.drafts.full_name) {
            Ok(name) => name,
            Err(error) => {
                self.alert = Some(error.to_string());
                return;
            }
        };
        self.drafts.full_name.clear();
        self.transcript.push_text(Role::User, &format!("You: {name}"));

        let request = ChatRequest {
            message: name.clone(),
            subject_id,
            manual_input: true,
            stage: Some(ConversationStage::Name),
            file: None,
        };
        self.dispatch_chat(request, RequestPurpose::Name);

        tracing::info!("Display name captured");
        self.record.display_name = Some(name);
        self.begin_session(Utc::now());
        self.gate_after_profile();
    }

    /// Consent checkpoint between profile capture and chat.
    fn gate_after_profile(&mut self) {
        if self.record.policies_accepted {
            self.unlock_chat();
        } else {
            self.stage = GateStage::AwaitingPolicy;
        }
    }

    fn unlock_chat(&mut self) {
        self.stage = GateStage::Ready;
    }

    pub fn accept_policy(&mut self) {
        if self.stage != GateStage::AwaitingPolicy {
            return;
        }
        tracing::info!("Privacy policy accepted");
        self.record.policies_accepted = true;
        self.persist();
        self.unlock_chat();
    }

    /// Purges remote data and disables the client for good, whatever the
    /// deletion call returns.
    pub fn reject_policy(&mut self) {
        if self.stage != GateStage::AwaitingPolicy {
            return;
        }
        tracing::info!("Privacy policy rejected; purging session");
        let subject_id = self.record.subject_id.clone();
        self.discard_session();
        self.stage = GateStage::Terminated;

        let Some(subject_id) = subject_id else {
            self.transcript.push_notice(REJECTED_OK);
            return;
        };
        let backend = self.backend.clone();
        let tx = self.event_tx.clone();
        self.runtime.spawn(async move {
            let result = backend
                .delete_user(&subject_id)
                .await
                .map_err(|error| format!("{error:#}"));
            let _ = tx.send(ControllerEvent::DeleteFinished { result });
        });
    }

    // ---- session timer ---------------------------------------------------

    fn begin_session(&mut self, now: DateTime<Utc>) {
        self.record.started_at = Some(now);
        self.persist();
        self.start_timer();
    }

    fn start_timer(&mut self) {
        self.countdown.reset();
        self.extension_prompt = false;
        let tx = self.event_tx.clone();
        let generation = self.generation;
        self.timer.start(&self.runtime, move |now| {
            tx.send(ControllerEvent::Tick { generation, now }).is_ok()
        });
    }

    fn handle_tick(&mut self, now: DateTime<Utc>) {
        let Some(started_at) = self.record.started_at else {
            return;
        };
        match self.countdown.evaluate(started_at, now) {
            TickOutcome::Running { .. } => {}
            TickOutcome::Warn { remaining } => {
                tracing::info!(
                    "Session near expiry ({} left); offering extension",
                    format_remaining(remaining)
                );
                self.extension_prompt = true;
            }
            TickOutcome::Expired => self.expire(),
        }
    }

    pub fn accept_extension(&mut self) {
        self.accept_extension_at(Utc::now());
    }

    fn accept_extension_at(&mut self, now: DateTime<Utc>) {
        self.extension_prompt = false;
        if self.record.started_at.is_none() {
            return;
        }
        self.record.started_at = Some(self.countdown.extend(now));
        self.persist();
        tracing::info!("Session extended");
    }

    pub fn decline_extension(&mut self) {
        self.extension_prompt = false;
        self.countdown.decline_extension();
    }

    fn expire(&mut self) {
        tracing::info!("Session expired; logging out");
        self.teardown();
        self.alert = Some(EXPIRED_ALERT.to_string());
    }

    /// Explicit logout. Confirmation happens in the view.
    pub fn logout(&mut self) {
        if self.stage == GateStage::Terminated {
            return;
        }
        tracing::info!("User logged out");
        self.teardown();
    }

    /// Clears everything and starts over at the identity gate.
    fn teardown(&mut self) {
        self.discard_session();
        self.transcript.clear();
        self.alert = None;
        self.status = None;
        self.transcript.push_text(Role::Assistant, WELCOME_TEXT);
        self.show_subject_id_gate();
    }

    fn discard_session(&mut self) {
        self.timer.stop();
        self.generation += 1;
        self.clear_persisted();
        self.attachments.clear();
        self.drafts = Drafts::default();
        self.countdown.reset();
        self.extension_prompt = false;
        self.chat_in_flight = false;
        self.transcript.end_composing();
    }

    // ---- attachment handler ----------------------------------------------

    pub fn stage_attachment(&mut self, attachment: PendingAttachment) {
        if !self.attachment_enabled() {
            return;
        }
        if self.attachments.stage(attachment) {
            self.drafts.message.clear();
        }
    }

    pub fn remove_attachment(&mut self) {
        self.attachments.clear();
    }

    // ---- message pipeline ------------------------------------------------

    pub fn submit_message(&mut self) {
        match self.stage {
            GateStage::Ready => {}
            GateStage::Terminated => return,
            _ => {
                if self.record.subject_id.is_none() {
                    self.alert = Some(ValidationError::MissingSubjectId.to_string());
                }
                return;
            }
        }
        let prepared = prepare_submission(
            self.record.subject_id.as_ref(),
            &self.drafts.message,
            self.attachments.staged(),
            self.config.attachment_default_prompt.as_deref(),
        );
        let submission = match prepared {
            Ok(Some(submission)) => submission,
            Ok(None) => return,
            Err(error) => {
                self.alert = Some(error.to_string());
                return;
            }
        };
        if self.chat_in_flight {
            self.status = Some(BUSY_NOTICE.to_string());
            return;
        }

        for line in &submission.transcript_lines {
            self.transcript.push_text(Role::User, line);
        }
        self.drafts.message.clear();
        self.attachments.clear();
        self.dispatch_chat(submission.request, RequestPurpose::Message);
    }

    fn dispatch_chat(&mut self, request: ChatRequest, purpose: RequestPurpose) {
        self.chat_in_flight = true;
        self.status = None;
        self.transcript.begin_composing();

        let backend = self.backend.clone();
        let tx = self.event_tx.clone();
        let generation = self.generation;
        self.runtime.spawn(async move {
            let result = backend
                .send_chat(request)
                .await
                .map_err(|error| format!("{error:#}"));
            let _ = tx.send(ControllerEvent::ChatFinished {
                generation,
                purpose,
                result,
            });
        });
    }

    fn handle_chat_finished(
        &mut self,
        generation: u64,
        purpose: RequestPurpose,
        result: Result<ChatReply, String>,
    ) {
        if generation != self.generation {
            tracing::debug!("Dropping reply from a discarded session");
            return;
        }
        self.chat_in_flight = false;
        self.transcript.end_composing();

        let reply = match result {
            Ok(reply) => reply,
            Err(error) => {
                tracing::error!("Chat request failed: {}", error);
                self.transcript.push_error(&format!("Error: {error}"));
                if purpose == RequestPurpose::Probe {
                    self.stage = GateStage::AwaitingName;
                }
                return;
            }
        };

        if !reply.response.trim().is_empty() {
            self.transcript.push_markup(&reply.response);
        }
        self.pending_cue = true;

        match purpose {
            RequestPurpose::Probe => self.apply_probe_reply(&reply),
            RequestPurpose::Name => {}
            RequestPurpose::Message => {
                if self.stage == GateStage::Ready && self.record.display_name.is_none() {
                    self.apply_profile_signal(&reply);
                }
            }
        }
    }

    fn apply_probe_reply(&mut self, reply: &ChatReply) {
        if self.stage != GateStage::Probing {
            return;
        }
        if !self.apply_profile_signal(reply) {
            tracing::debug!("Probe reply carried no profile signal; opening chat");
            self.unlock_chat();
        }
    }

    /// Acts on a reply while no display name is known: adopts a name the
    /// backend already has, or opens the name prompt when the backend asks for
    /// one. Returns false when the reply carries neither.
    fn apply_profile_signal(&mut self, reply: &ChatReply) -> bool {
        if let Some(name) = reply.detected_name() {
            tracing::info!("Backend already knows this subject's name");
            self.record.display_name = Some(name.to_string());
            self.begin_session(Utc::now());
            self.gate_after_profile();
            return true;
        }
        if reply_requests_name(reply, &self.config.name_prompt_markers) {
            self.stage = GateStage::AwaitingName;
            return true;
        }
        false
    }

    fn handle_delete_finished(&mut self, result: Result<(), String>) {
        match result {
            Ok(()) => self.transcript.push_notice(REJECTED_OK),
            Err(error) => {
                tracing::warn!("Remote deletion failed: {}", error);
                self.transcript.push_notice(REJECTED_FAILED);
            }
        }
    }

    // ---- event plumbing --------------------------------------------------

    /// Applies every event that has arrived since the last frame.
    pub fn poll_events(&mut self) {
        while let Ok(event) = self.event_rx.try_recv() {
            self.handle_event(event);
        }
    }

    pub async fn next_event(&self) -> Option<ControllerEvent> {
        self.event_rx.recv_async().await.ok()
    }

    pub fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::ChatFinished {
                generation,
                purpose,
                result,
            } => self.handle_chat_finished(generation, purpose, result),
            ControllerEvent::DeleteFinished { result } => self.handle_delete_finished(result),
            ControllerEvent::Tick { generation, now } => {
                if generation == self.generation {
                    self.handle_tick(now);
                }
            }
        }
    }

    // ---- persistence -----------------------------------------------------

    fn persist(&mut self) {
        if let Err(error) = self.store.save(&self.record) {
            tracing::warn!("Failed to persist session: {:#}", error);
            self.status = Some("Could not save your session on this device.".to_string());
        }
    }

    fn clear_persisted(&mut self) {
        self.record = SessionRecord::default();
        if let Err(error) = self.store.clear() {
            tracing::warn!("Failed to clear stored session: {:#}", error);
        }
    }
}

#[cfg(test)]
mod tests;
