use chrono::{DateTime, Local};
use scraper::{ElementRef, Html, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Message,
    Error,
    Notice,
}

#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub role: Role,
    pub kind: EntryKind,
    /// Source text as received. Plain entries are never interpreted as markup.
    pub content: String,
    pub is_markup: bool,
    pub timestamp: DateTime<Local>,
    segments: Vec<Segment>,
}

impl TranscriptEntry {
    pub fn time_label(&self) -> String {
        self.timestamp.format("%H:%M").to_string()
    }

    /// Parsed once on insertion.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

/// Append-only log plus the transient composing indicator.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    composing: bool,
    scroll_pending: bool,
}

impl Transcript {
    pub fn push_text(&mut self, role: Role, text: &str) {
        self.push(role, EntryKind::Message, text, false);
    }

    /// Assistant reply, already rendered to markup by the backend.
    pub fn push_markup(&mut self, markup: &str) {
        self.push(Role::Assistant, EntryKind::Message, markup, true);
    }

    pub fn push_error(&mut self, text: &str) {
        self.push(Role::Assistant, EntryKind::Error, text, false);
    }

    pub fn push_notice(&mut self, text: &str) {
        self.push(Role::Assistant, EntryKind::Notice, text, false);
    }

    fn push(&mut self, role: Role, kind: EntryKind, content: &str, is_markup: bool) {
        let segments = if is_markup {
            markup_segments(content)
        } else {
            vec![Segment::Text(content.to_string())]
        };
        self.entries.push(TranscriptEntry {
            role,
            kind,
            content: content.to_string(),
            is_markup,
            timestamp: Local::now(),
            segments,
        });
        self.scroll_pending = true;
    }

    pub fn begin_composing(&mut self) {
        self.composing = true;
        self.scroll_pending = true;
    }

    pub fn end_composing(&mut self) {
        self.composing = false;
    }

    pub fn is_composing(&self) -> bool {
        self.composing
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.composing = false;
        self.scroll_pending = true;
    }

    /// True once after every insertion; the view scrolls to the bottom.
    pub fn take_scroll_request(&mut self) -> bool {
        std::mem::take(&mut self.scroll_pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    /// Always opened in a new browser tab, never in the app window.
    Link { text: String, href: String },
}

const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "ul", "ol", "li", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre",
    "table", "tr",
];
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "head", "title"];
const LINK_SCHEMES: &[&str] = &["http://", "https://", "mailto:"];

/// Parses reply markup into display text and links. Entities are decoded by the
/// parser, whitespace is collapsed, block elements end a line and anchors with
/// a web or mail target become links. Everything else is reduced to its text.
pub fn markup_segments(markup: &str) -> Vec<Segment> {
    let fragment = Html::parse_fragment(markup);
    let mut writer = SegmentWriter::default();
    writer.walk(fragment.root_element());
    writer.finish()
}

#[derive(Default)]
struct SegmentWriter {
    segments: Vec<Segment>,
}

impl SegmentWriter {
    fn walk(&mut self, element: ElementRef<'_>) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => self.push_text(text),
                Node::Element(el) => {
                    let Some(child_ref) = ElementRef::wrap(child) else {
                        continue;
                    };
                    let name = el.name();
                    if SKIPPED_ELEMENTS.contains(&name) {
                        continue;
                    }
                    if name == "br" {
                        self.push_raw("\n");
                        continue;
                    }
                    if name == "a" {
                        if let Some(href) = el.attr("href").and_then(safe_href) {
                            self.push_link(child_ref, href);
                            continue;
                        }
                    }
                    let is_block = BLOCK_ELEMENTS.contains(&name);
                    if is_block {
                        self.end_line();
                    }
                    if name == "li" {
                        self.push_raw("• ");
                    }
                    self.walk(child_ref);
                    if is_block {
                        self.end_line();
                    }
                }
                _ => {}
            }
        }
    }

    fn push_text(&mut self, raw: &str) {
        let mut at_space = self.at_line_start_or_space();
        let mut collapsed = String::with_capacity(raw.len());
        for ch in raw.chars() {
            if ch.is_whitespace() {
                if !at_space {
                    collapsed.push(' ');
                    at_space = true;
                }
            } else {
                collapsed.push(ch);
                at_space = false;
            }
        }
        self.push_raw(&collapsed);
    }

    fn push_link(&mut self, anchor: ElementRef<'_>, href: &str) {
        let label = anchor.text().collect::<String>();
        let label = label.split_whitespace().collect::<Vec<_>>().join(" ");
        let text = if label.is_empty() { href.to_string() } else { label };
        self.segments.push(Segment::Link {
            text,
            href: href.to_string(),
        });
    }

    fn push_raw(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Segment::Text(previous)) = self.segments.last_mut() {
            previous.push_str(text);
        } else {
            self.segments.push(Segment::Text(text.to_string()));
        }
    }

    fn end_line(&mut self) {
        if let Some(Segment::Text(previous)) = self.segments.last_mut() {
            previous.truncate(previous.trim_end_matches(' ').len());
            if previous.is_empty() || previous.ends_with('\n') {
                return;
            }
        } else if self.segments.is_empty() {
            return;
        }
        self.push_raw("\n");
    }

    fn at_line_start_or_space(&self) -> bool {
        match self.segments.last() {
            None => true,
            Some(Segment::Text(text)) => text.ends_with(' ') || text.ends_with('\n'),
            Some(Segment::Link { .. }) => false,
        }
    }

    fn finish(mut self) -> Vec<Segment> {
        if let Some(Segment::Text(last)) = self.segments.last_mut() {
            last.truncate(last.trim_end().len());
            if last.is_empty() {
                self.segments.pop();
            }
        }
        self.segments
    }
}

/// Only web and mail targets are clickable; anything else stays text.
fn safe_href(href: &str) -> Option<&str> {
    let href = href.trim();
    let lower = href.to_ascii_lowercase();
    LINK_SCHEMES
        .iter()
        .any(|scheme| lower.starts_with(scheme))
        .then_some(href)
}
