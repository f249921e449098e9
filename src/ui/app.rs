use eframe::egui;

use crate::chat::attachment::{format_size, AttachmentKind};
use crate::chat::{EntryKind, PendingAttachment, Role, Segment, TranscriptEntry};
use crate::controller::{ChatController, GateStage};

const USER_BUBBLE: egui::Color32 = egui::Color32::from_rgb(38, 70, 110);
const BOT_BUBBLE: egui::Color32 = egui::Color32::from_rgb(44, 44, 52);
const ERROR_BUBBLE: egui::Color32 = egui::Color32::from_rgb(110, 40, 40);
const ALERT_COLOR: egui::Color32 = egui::Color32::from_rgb(255, 90, 90);

pub struct ChatApp {
    controller: ChatController,
    // Declared after the controller so it is dropped last.
    _runtime: tokio::runtime::Runtime,
    confirm_logout: bool,
    attachment_error: Option<String>,
}

impl ChatApp {
    pub fn new(runtime: tokio::runtime::Runtime, controller: ChatController) -> Self {
        Self {
            controller,
            _runtime: runtime,
            confirm_logout: false,
            attachment_error: None,
        }
    }

    fn pick_attachment(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("Documents", &AttachmentKind::EXTENSIONS)
            .pick_file()
        else {
            return;
        };
        match PendingAttachment::from_path(&path) {
            Ok(attachment) => {
                self.attachment_error = None;
                self.controller.stage_attachment(attachment);
            }
            Err(error) => {
                tracing::warn!("Failed to read attachment: {:#}", error);
                self.attachment_error = Some(format!("Could not read file: {}", error));
            }
        }
    }

    fn render_header(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.heading("INNOVUG");
            if let Some(name) = self.controller.record().display_name.as_deref() {
                ui.label(egui::RichText::new(name).weak().small());
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let can_logout = self.controller.record().subject_id.is_some()
                    && self.controller.stage() != GateStage::Terminated;
                if ui
                    .add_enabled(can_logout, egui::Button::new("Log out"))
                    .clicked()
                {
                    self.confirm_logout = true;
                }

                if let Some((label, alert)) = self.controller.countdown_label() {
                    let text = egui::RichText::new(format!("⏱ {}", label)).monospace();
                    let text = if alert {
                        text.color(ALERT_COLOR).strong()
                    } else {
                        text.weak()
                    };
                    ui.label(text).on_hover_text("Time left in this session");
                }
            });
        });
    }

    fn render_transcript(&mut self, ui: &mut egui::Ui) {
        let scroll_to_bottom = self.controller.transcript_mut().take_scroll_request();
        egui::ScrollArea::vertical()
            .auto_shrink([false, false])
            .stick_to_bottom(true)
            .id_salt("transcript_scroll")
            .show(ui, |ui| {
                for entry in self.controller.transcript().entries() {
                    render_entry(ui, entry);
                    ui.add_space(4.0);
                }

                if self.controller.transcript().is_composing() {
                    ui.label(egui::RichText::new("Typing...").italics().weak());
                }

                self.render_gate_card(ui);

                if scroll_to_bottom {
                    ui.scroll_to_cursor(Some(egui::Align::BOTTOM));
                }
            });
    }

    /// Inline prompts for whichever gate step is pending.
    fn render_gate_card(&mut self, ui: &mut egui::Ui) {
        match self.controller.stage() {
            GateStage::AwaitingSubjectId => {
                bot_frame(ui, BOT_BUBBLE).show(ui, |ui| {
                    ui.label("ID number:");
                    let response = ui.add(
                        egui::TextEdit::singleline(&mut self.controller.drafts.subject_id)
                            .char_limit(10)
                            .hint_text("e.g. 0912345678"),
                    );
                    let submitted =
                        response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                    if ui.button("Save").clicked() || submitted {
                        self.controller.submit_subject_id();
                    }
                });
            }
            GateStage::AwaitingName => {
                bot_frame(ui, BOT_BUBBLE).show(ui, |ui| {
                    ui.label("Please enter your full name (first and last name):");
                    let response = ui.add(
                        egui::TextEdit::singleline(&mut self.controller.drafts.full_name)
                            .hint_text("e.g. Ana Pérez"),
                    );
                    let submitted =
                        response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                    if ui.button("Continue").clicked() || submitted {
                        self.controller.submit_name();
                    }
                });
            }
            GateStage::AwaitingPolicy => {
                let policy_url = self.controller.config().policy_url.clone();
                bot_frame(ui, BOT_BUBBLE).show(ui, |ui| {
                    ui.label("Before we continue, please review our privacy policy:");
                    ui.add(
                        egui::Hyperlink::from_label_and_url("Privacy policy", policy_url)
                            .open_in_new_tab(true),
                    );
                    ui.add_space(4.0);
                    ui.horizontal(|ui| {
                        if ui
                            .button(
                                egui::RichText::new("Accept")
                                    .color(egui::Color32::from_rgb(80, 200, 100)),
                            )
                            .clicked()
                        {
                            self.controller.accept_policy();
                        }
                        if ui
                            .button(
                                egui::RichText::new("Reject")
                                    .color(egui::Color32::from_rgb(200, 80, 80)),
                            )
                            .clicked()
                        {
                            self.controller.reject_policy();
                        }
                    });
                });
            }
            GateStage::Probing | GateStage::Ready | GateStage::Terminated => {}
        }
    }

    fn render_composer(&mut self, ui: &mut egui::Ui) {
        if let Some(attachment) = self.controller.attachment() {
            let mut remove = false;
            egui::Frame::group(ui.style()).show(ui, |ui| {
                ui.horizontal_wrapped(|ui| {
                    ui.label(egui::RichText::new("📎").strong());
                    ui.label(truncate_str(&attachment.file_name, 40))
                        .on_hover_text(attachment.file_name.as_str());
                    ui.label(
                        egui::RichText::new(format_size(attachment.bytes.len()))
                            .small()
                            .weak(),
                    );
                    if let Some(preview) = &attachment.preview {
                        if !preview.looks_valid {
                            ui.colored_label(ALERT_COLOR, "not a valid PDF");
                        }
                    }
                    if let Some(url) = attachment.preview_url() {
                        if ui
                            .small_button("👁 Preview")
                            .on_hover_text("Open in your PDF viewer")
                            .clicked()
                        {
                            ui.ctx().open_url(egui::OpenUrl::new_tab(url));
                        }
                    }
                    if ui.small_button("✖ Remove").clicked() {
                        remove = true;
                    }
                });
            });
            if remove {
                self.controller.remove_attachment();
            }
            ui.add_space(4.0);
        }

        if let Some(error) = self.attachment_error.as_deref() {
            ui.colored_label(ALERT_COLOR, error);
        }
        if self.controller.is_waiting() {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.label(egui::RichText::new("Waiting for INNOVUG...").small().weak());
            });
        }
        if let Some(status) = self.controller.status() {
            ui.label(egui::RichText::new(status).small().weak().italics());
        }

        let composer_enabled = self.controller.composer_enabled();
        let attach_enabled = self.controller.attachment_enabled();
        let hint = if self.controller.is_attached() && !composer_enabled {
            "Document attached. Press Send to analyze it."
        } else {
            "Type your message..."
        };

        ui.horizontal(|ui| {
            if ui
                .add_enabled(attach_enabled, egui::Button::new("📎"))
                .on_hover_text("Attach a PDF, CSV or XLSX file")
                .clicked()
            {
                self.pick_attachment();
            }

            let response = ui.add_enabled(
                composer_enabled,
                egui::TextEdit::singleline(&mut self.controller.drafts.message)
                    .desired_width(ui.available_width() - 70.0)
                    .hint_text(hint),
            );
            let send_shortcut =
                response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            let send_clicked = ui
                .add_enabled(attach_enabled, egui::Button::new("Send"))
                .clicked();

            if send_shortcut || send_clicked {
                self.controller.submit_message();
                response.request_focus();
            }
        });
    }

    fn render_dialogs(&mut self, ctx: &egui::Context) {
        if let Some(alert) = self.controller.alert().map(str::to_string) {
            let mut dismissed = false;
            egui::Window::new("Notice")
                .collapsible(false)
                .resizable(false)
                .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
                .show(ctx, |ui| {
                    ui.label(alert);
                    ui.add_space(8.0);
                    if ui.button("OK").clicked() {
                        dismissed = true;
                    }
                });
            if dismissed {
                self.controller.dismiss_alert();
            }
        }

        if self.controller.wants_extension() {
            egui::Window::new("Session ending soon")
                .collapsible(false)
                .resizable(false)
                .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
                .show(ctx, |ui| {
                    ui.label("Your session is about to expire. Do you want to extend it?");
                    ui.add_space(8.0);
                    ui.horizontal(|ui| {
                        if ui.button("Extend").clicked() {
                            self.controller.accept_extension();
                        }
                        if ui.button("No thanks").clicked() {
                            self.controller.decline_extension();
                        }
                    });
                });
        }

        if self.confirm_logout {
            let mut open = true;
            egui::Window::new("Log out?")
                .collapsible(false)
                .resizable(false)
                .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
                .open(&mut open)
                .show(ctx, |ui| {
                    ui.label("Your session data on this device will be cleared.");
                    ui.add_space(8.0);
                    ui.horizontal(|ui| {
                        if ui
                            .button(
                                egui::RichText::new("Log out")
                                    .color(egui::Color32::from_rgb(200, 80, 80)),
                            )
                            .clicked()
                        {
                            self.confirm_logout = false;
                            self.attachment_error = None;
                            self.controller.logout();
                        }
                        if ui.button("Cancel").clicked() {
                            self.confirm_logout = false;
                        }
                    });
                });
            if !open {
                self.confirm_logout = false;
            }
        }
    }
}

impl eframe::App for ChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.controller.poll_events();

        if self.controller.take_cue() && self.controller.config().notification_sound {
            super::notify::play_cue();
        }

        let interactive = !self.controller.blocks_input();

        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            ui.add_enabled_ui(interactive, |ui| {
                ui.add_space(4.0);
                self.render_header(ui);
                ui.add_space(4.0);
            });
        });

        egui::TopBottomPanel::bottom("composer").show(ctx, |ui| {
            ui.add_enabled_ui(interactive, |ui| {
                ui.add_space(6.0);
                self.render_composer(ui);
                ui.add_space(6.0);
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add_enabled_ui(interactive, |ui| {
                self.render_transcript(ui);
            });
        });

        self.render_dialogs(ctx);

        ctx.request_repaint_after(std::time::Duration::from_millis(100));
    }
}

fn bot_frame(ui: &egui::Ui, fill: egui::Color32) -> egui::Frame {
    egui::Frame::group(ui.style())
        .fill(fill)
        .rounding(egui::Rounding::same(8.0))
        .inner_margin(egui::Margin::same(8.0))
}

fn render_entry(ui: &mut egui::Ui, entry: &TranscriptEntry) {
    let fill = match (entry.kind, entry.role) {
        (EntryKind::Error, _) => ERROR_BUBBLE,
        (_, Role::User) => USER_BUBBLE,
        (_, Role::Assistant) => BOT_BUBBLE,
    };
    let align = match entry.role {
        Role::User => egui::Align::Max,
        Role::Assistant => egui::Align::Min,
    };

    ui.with_layout(egui::Layout::top_down(align), |ui| {
        bot_frame(ui, fill).show(ui, |ui| {
            ui.set_max_width(ui.available_width() * 0.8);
            if entry.role == Role::Assistant && entry.is_markup {
                ui.label(egui::RichText::new("INNOVUG").small().strong());
            }
            ui.horizontal_wrapped(|ui| {
                for segment in entry.segments() {
                    match segment {
                        Segment::Text(text) => {
                            let text = if entry.kind == EntryKind::Notice {
                                egui::RichText::new(text.as_str()).italics()
                            } else {
                                egui::RichText::new(text.as_str())
                            };
                            ui.label(text);
                        }
                        Segment::Link { text, href } => {
                            ui.add(
                                egui::Hyperlink::from_label_and_url(text.as_str(), href)
                                    .open_in_new_tab(true),
                            );
                        }
                    }
                }
            });
            ui.label(egui::RichText::new(entry.time_label()).small().weak());
        });
    });
}

fn truncate_str(text: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(text.len().min(max_chars + 4));
    for (i, ch) in text.chars().enumerate() {
        if i >= max_chars {
            out.push('…');
            break;
        }
        out.push(ch);
    }
    out
}
