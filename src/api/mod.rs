//! HTTP client for the remote conversational backend.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::attachment::AttachmentKind;
use crate::session::SubjectId;

/// Conversation stage tag sent as `etapa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStage {
    Name,
}

impl ConversationStage {
    pub fn as_form_value(self) -> &'static str {
        match self {
            ConversationStage::Name => "nombre",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutboundFile {
    pub kind: AttachmentKind,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// One multipart chat turn.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub subject_id: SubjectId,
    pub manual_input: bool,
    pub stage: Option<ConversationStage>,
    pub file: Option<OutboundFile>,
}

impl ChatRequest {
    /// Plain form fields in wire order. The file part is attached separately.
    pub fn text_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("message", self.message.clone()),
            ("user_id", self.subject_id.as_str().to_string()),
            ("manual_input", self.manual_input.to_string()),
        ];
        if let Some(stage) = self.stage {
            fields.push(("etapa", stage.as_form_value().to_string()));
        }
        fields
    }
}

/// What the backend wants the client to do next. Values this client does not
/// know deserialize as `Unknown` and carry no signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    AskName,
    Chat,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    /// Pre-rendered markup.
    pub response: String,
    /// Display name the backend already has on file for this subject.
    #[serde(default, rename = "nombre", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<NextStep>,
}

impl ChatReply {
    pub fn detected_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send_chat(&self, request: ChatRequest) -> Result<ChatReply>;
    async fn delete_user(&self, subject_id: &SubjectId) -> Result<()>;
}

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn build_form(request: ChatRequest) -> Result<reqwest::multipart::Form> {
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in request.text_fields() {
            form = form.text(name, value);
        }
        if let Some(file) = request.file {
            let part = reqwest::multipart::Part::bytes(file.bytes)
                .file_name(file.file_name)
                .mime_str(file.kind.mime_type())
                .context("invalid attachment MIME type")?;
            form = form.part(file.kind.field_name(), part);
        }
        Ok(form)
    }
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn send_chat(&self, request: ChatRequest) -> Result<ChatReply> {
        let request_id = Uuid::new_v4();
        tracing::debug!(
            %request_id,
            manual_input = request.manual_input,
            stage = request.stage.map(ConversationStage::as_form_value),
            attachment = request.file.as_ref().map(|f| f.kind.field_name()),
            "POST /api/chat"
        );

        let form = Self::build_form(request)?;
        let response = self
            .http
            .post(self.url("/api/chat"))
            .multipart(form)
            .send()
            .await
            .context("chat request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%request_id, %status, "chat request rejected");
            anyhow::bail!("backend returned {}: {}", status, body.trim());
        }

        let reply: ChatReply = response
            .json()
            .await
            .context("failed to parse chat response")?;
        tracing::debug!(
            %request_id,
            detected_name = reply.display_name.is_some(),
            next_step = ?reply.next_step,
            "chat reply received"
        );
        Ok(reply)
    }

    async fn delete_user(&self, subject_id: &SubjectId) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/api/usuarios/{}", subject_id)))
            .send()
            .await
            .context("delete request failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("backend returned {} while deleting user data", status);
        }
        tracing::info!("Remote data deleted for subject {}", subject_id.masked());
        Ok(())
    }
}
