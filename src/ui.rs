use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eframe::egui;
use tokio::runtime::Handle;
use tokio::sync::Mutex;

use odocam::error::Alert;
use odocam::screen::CaptureScreen;
use odocam::state::{FacingMode, View};

use crate::texture::PreviewTexture;

// ============================================================================
// CONSTANTS FOR UI STYLING
// ============================================================================
const UI_PADDING: f32 = 20.0;
const SHUTTER_RADIUS: f32 = 70.0;
const SIDE_BUTTON_RADIUS: f32 = 45.0;
const VIEWPORT_BG: egui::Color32 = egui::Color32::from_rgb(40, 40, 40);
const BUTTON_FILL: egui::Color32 = egui::Color32::from_rgba_premultiplied(70, 70, 80, 180);
const CONFIRM_FILL: egui::Color32 = egui::Color32::from_rgb(40, 120, 40);

// ============================================================================
// MAIN APP STRUCT
// ============================================================================

/// Window shell around [`CaptureScreen`].
///
/// The screen lives behind an async mutex so device calls can run on the tokio
/// runtime. Each frame takes a snapshot with `try_lock`; while an operation
/// holds the lock the last snapshot stays on screen.
pub struct OdocamApp {
    screen: Arc<Mutex<CaptureScreen>>,
    runtime: Handle,
    busy: Arc<AtomicBool>,

    // Snapshot of the screen, refreshed whenever the lock is free
    view: View,
    facing: FacingMode,
    submitting: bool,
    alert: Option<Alert>,
    endpoint: String,
    preview: PreviewTexture,

    // Edits made while the screen was locked, applied on the next free frame
    reading_input: String,
    reading_dirty: bool,
    dismissed: Option<Alert>,
}

// ============================================================================
// INITIALIZATION
// ============================================================================

impl OdocamApp {
    pub fn new(screen: CaptureScreen, runtime: Handle) -> Self {
        let endpoint = screen.client().endpoint().to_string();
        let app = Self {
            screen: Arc::new(Mutex::new(screen)),
            runtime,
            busy: Arc::new(AtomicBool::new(false)),
            view: View::Loading,
            facing: FacingMode::default(),
            submitting: false,
            alert: None,
            endpoint,
            preview: PreviewTexture::default(),
            reading_input: String::new(),
            reading_dirty: false,
            dismissed: None,
        };

        let screen = app.screen.clone();
        app.runtime.spawn(async move {
            screen.lock().await.mount().await;
        });
        app
    }

    /// Run `op` against the screen on the runtime. Ignored if another one is running.
    fn spawn_action<F, Fut>(&self, ctx: &egui::Context, op: F)
    where
        F: FnOnce(Arc<Mutex<CaptureScreen>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.busy.swap(true, Ordering::SeqCst) {
            log::debug!("Action ignored, another one is running");
            return;
        }

        let screen = self.screen.clone();
        let busy = self.busy.clone();
        let ctx = ctx.clone();
        self.runtime.spawn(async move {
            op(screen).await;
            busy.store(false, Ordering::SeqCst);
            ctx.request_repaint();
        });
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn controls_enabled(&self) -> bool {
        controls_enabled(self.is_busy(), self.submitting, self.alert.as_ref())
    }

    fn take_picture(&self, ctx: &egui::Context) {
        self.spawn_action(ctx, |screen| async move {
            let _ = screen.lock().await.take_picture().await;
        });
    }

    fn pick_image(&self, ctx: &egui::Context) {
        self.spawn_action(ctx, |screen| async move {
            let _ = screen.lock().await.pick_image().await;
        });
    }

    fn request_permission(&self, ctx: &egui::Context) {
        self.spawn_action(ctx, |screen| async move {
            screen.lock().await.request_permission().await;
        });
    }

    fn confirm(&mut self, ctx: &egui::Context) {
        // Flush the reading first so the submission carries what is on screen
        let reading = self.reading_dirty.then(|| self.reading_input.clone());
        self.reading_dirty = false;

        self.spawn_action(ctx, move |screen| async move {
            let (submission, client) = {
                let mut guard = screen.lock().await;
                if let Some(reading) = reading {
                    guard.set_reading(reading);
                }
                match guard.begin_submission() {
                    Ok(submission) => (submission, guard.client().clone()),
                    Err(_) => return,
                }
            };

            // The lock is released while the request is in flight
            let result = client.submit_async(submission).await;
            let _ = screen.lock().await.finish_submission(result);
        });
    }

    /// Copy what the renderer needs out of the screen and push pending edits in.
    fn refresh_snapshot(&mut self, ctx: &egui::Context) {
        let Ok(mut screen) = self.screen.try_lock() else {
            return;
        };

        if self.reading_dirty {
            screen.set_reading(self.reading_input.clone());
            self.reading_dirty = false;
        } else if screen.state().reading() != self.reading_input {
            self.reading_input = screen.state().reading().to_string();
        }

        if let Some(dismissed) = self.dismissed.take() {
            if should_dismiss(screen.alert(), &dismissed) {
                screen.dismiss_alert();
            }
        }

        self.view = screen.view();
        self.facing = screen.state().facing;
        self.submitting = screen.is_submitting();
        self.alert = screen.alert().cloned();
        self.preview.sync(ctx, screen.state().image());
    }
}

// ============================================================================
// MAIN UPDATE LOOP
// ============================================================================

impl eframe::App for OdocamApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // ESC key to exit (for debugging in kiosk mode with keyboard)
        if ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        self.refresh_snapshot(ctx);

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                let full_rect = ui.max_rect();
                ui.painter().rect_filled(full_rect, 0.0, VIEWPORT_BG);

                match self.view {
                    View::Loading => self.render_loading(ui, full_rect),
                    View::PermissionRequired => self.render_permission_required(ui, ctx, full_rect),
                    View::Acquire => {
                        self.render_acquire_viewport(ui, full_rect);
                        self.render_acquire_buttons(ctx, full_rect);
                    }
                    View::Preview => {
                        self.render_preview_viewport(ui, full_rect);
                        self.render_preview_controls(ctx, full_rect);
                    }
                }

                if self.is_busy() {
                    self.render_busy_indicator(ctx, full_rect);
                }
            });

        self.render_alert(ctx);

        // Keep polling while a background action may change the screen
        if self.is_busy() || self.view == View::Loading {
            ctx.request_repaint_after(std::time::Duration::from_millis(100));
        }
    }
}

// ============================================================================
// VIEWPORT RENDERING
// ============================================================================

impl OdocamApp {
    fn render_loading(&mut self, ui: &mut egui::Ui, rect: egui::Rect) {
        ui.allocate_ui_at_rect(rect, |ui| {
            ui.centered_and_justified(|ui| {
                ui.add(egui::Spinner::new().size(48.0));
            });
        });
    }

    fn render_permission_required(&mut self, ui: &mut egui::Ui, ctx: &egui::Context, rect: egui::Rect) {
        ui.allocate_ui_at_rect(rect, |ui| {
            ui.vertical_centered(|ui| {
                ui.add_space(rect.height() * 0.35);
                ui.label(
                    egui::RichText::new("We need your permission to show the camera")
                        .color(egui::Color32::WHITE)
                        .size(22.0),
                );
                ui.add_space(UI_PADDING);
                let button = egui::Button::new(egui::RichText::new("Grant permission").size(20.0));
                if ui.add_enabled(self.controls_enabled(), button).clicked() {
                    self.request_permission(ctx);
                }
            });
        });
    }

    fn render_acquire_viewport(&mut self, ui: &mut egui::Ui, rect: egui::Rect) {
        // No live feed from the still-capture tools, only a framing hint
        let frame_size = fit_image_in_rect(egui::vec2(4.0, 3.0), rect.size() * 0.8);
        let frame_rect = center_rect_in_rect(frame_size, rect);
        ui.painter().rect_stroke(
            frame_rect,
            8.0,
            egui::Stroke::new(2.0, egui::Color32::from_white_alpha(90)),
        );

        let text = format!("Frame the odometer ({} camera)", self.facing);
        let galley = ui.painter().layout_no_wrap(
            text,
            egui::FontId::proportional(20.0),
            egui::Color32::from_white_alpha(160),
        );
        let text_pos = egui::pos2(rect.center().x - galley.size().x / 2.0, frame_rect.min.y + UI_PADDING);
        ui.painter().galley(text_pos, galley);
    }

    fn render_preview_viewport(&mut self, ui: &mut egui::Ui, rect: egui::Rect) {
        // Leave room for the reading input below the image
        let image_area = egui::Rect::from_min_max(rect.min, egui::pos2(rect.max.x, rect.max.y - 140.0));

        if let Some(texture) = self.preview.texture() {
            let display_size = fit_image_in_rect(texture.size_vec2(), image_area.size());
            let centered_rect = center_rect_in_rect(display_size, image_area);

            ui.allocate_ui_at_rect(centered_rect, |ui| {
                ui.add(egui::Image::new(texture).fit_to_exact_size(display_size));
            });
        } else {
            ui.allocate_ui_at_rect(image_area, |ui| {
                ui.centered_and_justified(|ui| {
                    ui.label("Preview unavailable");
                });
            });
        }
    }

    fn render_busy_indicator(&self, ctx: &egui::Context, screen_rect: egui::Rect) {
        let label = if self.submitting { "Sending..." } else { "Working..." };
        egui::Area::new("busy_indicator")
            .fixed_pos(egui::pos2(screen_rect.min.x + UI_PADDING, screen_rect.min.y + UI_PADDING))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.add(egui::Spinner::new());
                    ui.label(egui::RichText::new(label).color(egui::Color32::WHITE));
                });
            });
    }

    fn render_alert(&mut self, ctx: &egui::Context) {
        let Some(alert) = self.alert.clone() else {
            return;
        };

        let title_color = if alert.is_error() {
            egui::Color32::from_rgb(220, 80, 80)
        } else {
            egui::Color32::from_rgb(80, 200, 80)
        };

        egui::Window::new(egui::RichText::new(&alert.title).color(title_color))
            .id(egui::Id::new("alert"))
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::vec2(0.0, 0.0))
            .show(ctx, |ui| {
                ui.label(&alert.message);
                ui.add_space(8.0);
                if ui.button("OK").clicked() {
                    self.dismissed = self.alert.take();
                }
            });
    }
}

// ============================================================================
// BUTTON ZONE RENDERING (OVERLAY)
// ============================================================================

impl OdocamApp {
    // Shutter in the bottom center, flip on its left, library on its right
    fn render_acquire_buttons(&mut self, ctx: &egui::Context, screen_rect: egui::Rect) {
        const SPACING: f32 = 40.0;

        let shutter_center = egui::pos2(
            screen_rect.center().x,
            screen_rect.max.y - SHUTTER_RADIUS - UI_PADDING,
        );
        let flip_center = egui::pos2(
            shutter_center.x - SHUTTER_RADIUS - SPACING - SIDE_BUTTON_RADIUS,
            shutter_center.y,
        );
        let library_center = egui::pos2(
            shutter_center.x + SHUTTER_RADIUS + SPACING + SIDE_BUTTON_RADIUS,
            shutter_center.y,
        );
        let enabled = self.controls_enabled();

        egui::Area::new("flip_btn")
            .fixed_pos(flip_center - egui::vec2(SIDE_BUTTON_RADIUS, SIDE_BUTTON_RADIUS))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                if circular_button(ui, SIDE_BUTTON_RADIUS, "Flip", BUTTON_FILL, enabled) {
                    // Facing is pure state, no device round trip needed
                    if let Ok(mut screen) = self.screen.try_lock() {
                        screen.toggle_facing();
                    }
                }
            });

        egui::Area::new("shutter_btn")
            .fixed_pos(shutter_center - egui::vec2(SHUTTER_RADIUS, SHUTTER_RADIUS))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                if circular_button(ui, SHUTTER_RADIUS, "", BUTTON_FILL, enabled) {
                    self.take_picture(ctx);
                }
            });

        egui::Area::new("library_btn")
            .fixed_pos(library_center - egui::vec2(SIDE_BUTTON_RADIUS, SIDE_BUTTON_RADIUS))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                if circular_button(ui, SIDE_BUTTON_RADIUS, "Library", BUTTON_FILL, enabled) {
                    self.pick_image(ctx);
                }
            });
    }

    // Reading input, then Retake / Confirm
    fn render_preview_controls(&mut self, ctx: &egui::Context, screen_rect: egui::Rect) {
        let enabled = self.controls_enabled();
        let editable = controls_enabled(false, self.submitting, self.alert.as_ref());

        egui::Area::new("preview_controls")
            .anchor(egui::Align2::CENTER_BOTTOM, egui::vec2(0.0, -UI_PADDING))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                ui.vertical_centered(|ui| {
                    let input = egui::TextEdit::singleline(&mut self.reading_input)
                        .hint_text("Enter odometer reading")
                        .font(egui::TextStyle::Heading)
                        .desired_width((screen_rect.width() * 0.5).min(480.0));
                    if ui.add_enabled(editable, input).changed() {
                        self.reading_dirty = true;
                    }

                    ui.add_space(12.0);
                    ui.horizontal(|ui| {
                        if circular_button(ui, SIDE_BUTTON_RADIUS, "Retake", BUTTON_FILL, enabled) {
                            if let Ok(mut screen) = self.screen.try_lock() {
                                screen.retake();
                            }
                        }
                        ui.add_space(UI_PADDING * 2.0);
                        if circular_button(ui, SIDE_BUTTON_RADIUS, "Confirm", CONFIRM_FILL, enabled) {
                            self.confirm(ctx);
                        }
                    });

                    ui.label(
                        egui::RichText::new(format!("Sends to {}", self.endpoint))
                            .color(egui::Color32::from_white_alpha(120))
                            .size(12.0),
                    );
                });
            });
    }
}

// ============================================================================
// CIRCULAR BUTTON HELPERS
// ============================================================================

/// Touch-sized round button. Returns true when clicked while enabled.
fn circular_button(ui: &mut egui::Ui, radius: f32, text: &str, base_fill: egui::Color32, enabled: bool) -> bool {
    let size = egui::vec2(radius * 2.0, radius * 2.0);
    let sense = if enabled { egui::Sense::click() } else { egui::Sense::hover() };
    let (rect, response) = ui.allocate_exact_size(size, sense);

    if ui.is_rect_visible(rect) {
        let painter = ui.painter();
        let center = rect.center();

        let (fill_color, stroke_color) = if !enabled {
            (egui::Color32::from_rgba_unmultiplied(60, 60, 60, 120), egui::Color32::from_rgb(80, 80, 80))
        } else if response.is_pointer_button_down_on() {
            // Pressed state - darker
            let r = base_fill.r().saturating_sub(30);
            let g = base_fill.g().saturating_sub(30);
            let b = base_fill.b().saturating_sub(30);
            (egui::Color32::from_rgb(r, g, b), egui::Color32::from_rgb(120, 120, 130))
        } else if response.hovered() {
            let r = base_fill.r().saturating_add(20);
            let g = base_fill.g().saturating_add(20);
            let b = base_fill.b().saturating_add(20);
            (egui::Color32::from_rgb(r, g, b), egui::Color32::from_rgb(150, 150, 160))
        } else {
            (base_fill, egui::Color32::from_rgb(100, 100, 110))
        };

        // Shadow for depth
        painter.circle(
            center + egui::vec2(3.0, 3.0),
            radius,
            egui::Color32::from_black_alpha(80),
            egui::Stroke::NONE,
        );
        painter.circle(center, radius, fill_color, egui::Stroke::new(3.0, stroke_color));

        let font_id = egui::FontId::proportional((radius / 3.0).max(14.0));
        let galley = painter.layout_no_wrap(text.to_string(), font_id, egui::Color32::WHITE);
        painter.galley(center - galley.size() / 2.0, galley);

        if enabled && response.hovered() {
            ui.ctx().set_cursor_icon(egui::CursorIcon::PointingHand);
        }
    }

    enabled && response.clicked()
}

/// Screen controls accept input only when nothing is running and no alert is open.
fn controls_enabled(busy: bool, submitting: bool, alert: Option<&Alert>) -> bool {
    !busy && !submitting && alert.is_none()
}

/// A dismissed alert is only cleared if it is still the one on the screen.
fn should_dismiss(current: Option<&Alert>, dismissed: &Alert) -> bool {
    current == Some(dismissed)
}

// Helper functions for image centering
fn fit_image_in_rect(image_size: egui::Vec2, container_size: egui::Vec2) -> egui::Vec2 {
    let scale = (container_size.x / image_size.x).min(container_size.y / image_size.y);
    image_size * scale
}

fn center_rect_in_rect(content_size: egui::Vec2, container: egui::Rect) -> egui::Rect {
    let offset = (container.size() - content_size) * 0.5;
    egui::Rect::from_min_size(container.min + offset, content_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_blocks_controls() {
        let failure = Alert::new("Error", "Failed to confirm image: HTTP 500");

        assert!(controls_enabled(false, false, None));
        assert!(!controls_enabled(false, false, Some(&failure)));
        assert!(!controls_enabled(true, false, None));
        assert!(!controls_enabled(false, true, None));
    }

    #[test]
    fn test_dismiss_only_clears_the_seen_alert() {
        let seen = Alert::new("Error", "Failed to pick image from gallery");
        let newer = Alert::new("Failed to take picture", "Please try again");

        assert!(should_dismiss(Some(&seen), &seen));
        assert!(!should_dismiss(Some(&newer), &seen));
        assert!(!should_dismiss(None, &seen));
    }

    #[test]
    fn test_fit_image_in_rect_keeps_aspect() {
        let fitted = fit_image_in_rect(egui::vec2(1600.0, 1200.0), egui::vec2(800.0, 800.0));
        assert_eq!(fitted, egui::vec2(800.0, 600.0));
    }

    #[test]
    fn test_center_rect_in_rect() {
        let container = egui::Rect::from_min_size(egui::pos2(0.0, 0.0), egui::vec2(800.0, 800.0));
        let centered = center_rect_in_rect(egui::vec2(800.0, 600.0), container);
        assert_eq!(centered.min, egui::pos2(0.0, 100.0));
    }
}
