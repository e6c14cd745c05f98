use std::sync::Arc;

use anyhow::Result;
use eframe::egui;
use log::info;

mod texture;
mod ui;

use odocam::camera::LocalDevice;
use odocam::client::OdometerClient;
use odocam::config::Config;
use odocam::device::CaptureDevice;
use odocam::mock_device::MockDevice;
use odocam::screen::CaptureScreen;

use crate::ui::OdocamApp;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("📷 Starting odometer capture");

    let config = Config::load()?;
    info!(
        "Configuration loaded: {}x{} capture, submitting to {}",
        config.camera.width, config.camera.height, config.client.endpoint
    );

    // ODOCAM_SIMULATE runs the screen against an in-memory camera
    let device: Arc<dyn CaptureDevice> = if std::env::var_os("ODOCAM_SIMULATE").is_some() {
        log::warn!("ODOCAM_SIMULATE set, using simulated camera");
        Arc::new(MockDevice::new())
    } else {
        Arc::new(LocalDevice::new(&config))
    };

    let client = OdometerClient::new(&config.client);
    let screen = CaptureScreen::new(device, client);
    let runtime = tokio::runtime::Handle::current();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([800.0, 600.0])
            .with_min_inner_size([480.0, 400.0])
            .with_title("Odometer Capture"),
        ..Default::default()
    };

    info!("Launching GUI application...");

    eframe::run_native(
        "Odometer Capture",
        options,
        Box::new(move |cc| {
            setup_touch_style(&cc.egui_ctx);
            Box::new(OdocamApp::new(screen, runtime))
        }),
    )
    .map_err(|e| anyhow::anyhow!("Failed to run application: {}", e))?;

    info!("Application shut down gracefully");
    Ok(())
}

fn setup_touch_style(ctx: &egui::Context) {
    let mut style = (*ctx.style()).clone();

    // Larger UI elements for touch interaction
    style.spacing.button_padding = egui::vec2(16.0, 12.0);
    style.spacing.item_spacing = egui::vec2(12.0, 8.0);
    style.spacing.window_margin = egui::Margin::same(16.0);

    style.text_styles.insert(
        egui::TextStyle::Button,
        egui::FontId::new(18.0, egui::FontFamily::Proportional),
    );
    style.text_styles.insert(
        egui::TextStyle::Body,
        egui::FontId::new(16.0, egui::FontFamily::Proportional),
    );
    style.text_styles.insert(
        egui::TextStyle::Heading,
        egui::FontId::new(24.0, egui::FontFamily::Proportional),
    );

    ctx.set_style(style);
}
