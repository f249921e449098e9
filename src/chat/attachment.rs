use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::session::ValidationError;

const PDF_SIGNATURE: &[u8] = b"%PDF-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Pdf,
    Csv,
    Xlsx,
}

impl AttachmentKind {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "csv" => Some(Self::Csv),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        }
    }

    /// Multipart field the backend expects this kind under.
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Csv => "text/csv",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        }
    }

    pub const EXTENSIONS: [&'static str; 3] = ["pdf", "csv", "xlsx"];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfPreview {
    /// False when the bytes do not start with the PDF signature.
    pub looks_valid: bool,
}

/// The single staged document. The kind is re-checked at submission time, so
/// files with other extensions can be staged but never sent.
#[derive(Debug, Clone)]
pub struct PendingAttachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub kind: Option<AttachmentKind>,
    pub preview: Option<PdfPreview>,
    /// Where the bytes were read from, if they came from disk.
    pub source: Option<PathBuf>,
}

impl PendingAttachment {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let kind = AttachmentKind::from_file_name(&file_name);
        let preview = (kind == Some(AttachmentKind::Pdf)).then(|| PdfPreview {
            looks_valid: bytes.starts_with(PDF_SIGNATURE),
        });
        Self {
            file_name,
            bytes,
            kind,
            preview,
            source: None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let mut attachment = Self::new(file_name, bytes);
        attachment.source = Some(path.to_path_buf());
        Ok(attachment)
    }

    pub fn is_previewable(&self) -> bool {
        self.preview.is_some()
    }

    /// `file://` URL the system PDF viewer can open. Only for PDFs read from disk.
    pub fn preview_url(&self) -> Option<String> {
        if !self.is_previewable() {
            return None;
        }
        let source = self.source.as_ref()?;
        let absolute = std::fs::canonicalize(source).unwrap_or_else(|_| source.clone());
        Some(format!("file://{}", absolute.display()))
    }

    pub fn validated_kind(&self) -> Result<AttachmentKind, ValidationError> {
        self.kind
            .ok_or_else(|| ValidationError::UnsupportedAttachment(self.file_name.clone()))
    }
}

/// Composer-side attachment slot. Holds at most one file.
#[derive(Debug, Default)]
pub struct AttachmentSlot {
    staged: Option<PendingAttachment>,
}

impl AttachmentSlot {
    /// Replaces whatever was staged. Returns true when free-text entry must be
    /// disabled (a PDF is staged).
    pub fn stage(&mut self, attachment: PendingAttachment) -> bool {
        tracing::debug!(
            "Staged attachment {} ({} bytes)",
            attachment.file_name,
            attachment.bytes.len()
        );
        let blocks_text = attachment.is_previewable();
        self.staged = Some(attachment);
        blocks_text
    }

    pub fn clear(&mut self) -> Option<PendingAttachment> {
        self.staged.take()
    }

    pub fn staged(&self) -> Option<&PendingAttachment> {
        self.staged.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.staged.is_some()
    }

    pub fn blocks_text(&self) -> bool {
        self.staged.as_ref().is_some_and(PendingAttachment::is_previewable)
    }
}

pub fn format_size(bytes: usize) -> String {
    const KIB: f64 = 1024.0;
    let bytes_f = bytes as f64;
    if bytes_f < KIB {
        format!("{bytes} B")
    } else if bytes_f < KIB * KIB {
        format!("{:.1} KiB", bytes_f / KIB)
    } else {
        format!("{:.1} MiB", bytes_f / (KIB * KIB))
    }
}
