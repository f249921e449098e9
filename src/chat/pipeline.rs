//! Turns composer state into an outbound chat request.

use crate::api::{ChatReply, ChatRequest, NextStep, OutboundFile};
use crate::session::{SubjectId, ValidationError};

use super::attachment::PendingAttachment;

/// A validated submission: what goes on the wire plus what the transcript shows.
#[derive(Debug, Clone)]
pub struct Submission {
    pub request: ChatRequest,
    pub transcript_lines: Vec<String>,
}

/// Builds the request for a composer submission.
///
/// Returns `Ok(None)` when there is nothing to send (blank text, no file).
/// When only a file is present, `attachment_prompt` (if any) is sent as the
/// message text; the transcript still shows only the attachment notice.
pub fn prepare_submission(
    subject_id: Option<&SubjectId>,
    text: &str,
    attachment: Option<&PendingAttachment>,
    attachment_prompt: Option<&str>,
) -> Result<Option<Submission>, ValidationError> {
    let subject_id = subject_id.ok_or(ValidationError::MissingSubjectId)?;
    let text = text.trim();
    if text.is_empty() && attachment.is_none() {
        return Ok(None);
    }

    let file = match attachment {
        Some(attachment) => Some(OutboundFile {
            kind: attachment.validated_kind()?,
            file_name: attachment.file_name.clone(),
            bytes: attachment.bytes.clone(),
        }),
        None => None,
    };

    let mut transcript_lines = Vec::new();
    if !text.is_empty() {
        transcript_lines.push(format!("You: {text}"));
    }
    if let Some(attachment) = attachment {
        transcript_lines.push(format!("You (file): {}", attachment.file_name));
    }

    let manual_input = !text.is_empty();
    let message = if manual_input {
        text.to_string()
    } else {
        attachment_prompt.unwrap_or_default().to_string()
    };

    Ok(Some(Submission {
        request: ChatRequest {
            message,
            subject_id: subject_id.clone(),
            manual_input,
            stage: None,
            file,
        },
        transcript_lines,
    }))
}

/// The silent probe sent right after the subject id is registered.
pub fn probe_request(subject_id: &SubjectId, probe_message: &str) -> ChatRequest {
    ChatRequest {
        message: probe_message.to_string(),
        subject_id: subject_id.clone(),
        manual_input: false,
        stage: None,
        file: None,
    }
}

/// Whether a reply asks the client to collect the user's full name.
///
/// An explicit `next_step` decides. Without one, the reply text is matched
/// against the configured marker phrases.
pub fn reply_requests_name(reply: &ChatReply, markers: &[String]) -> bool {
    match reply.next_step {
        Some(NextStep::AskName) => true,
        Some(NextStep::Chat) => false,
        Some(NextStep::Unknown) | None => {
            let text = reply.response.to_lowercase();
            markers
                .iter()
                .map(|marker| marker.trim().to_lowercase())
                .any(|marker| !marker.is_empty() && text.contains(&marker))
        }
    }
}
