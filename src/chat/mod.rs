pub mod attachment;
pub mod pipeline;
pub mod transcript;

pub use attachment::{AttachmentKind, AttachmentSlot, PendingAttachment};
pub use transcript::{EntryKind, Role, Segment, Transcript, TranscriptEntry};
