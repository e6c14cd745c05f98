use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use odocam::config::Config;
use odocam::ocr::{NoExtractor, ReadingExtractor, TesseractExtractor};
use odocam::server::{Receiver, ReceiverServer};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("🚗 Starting odometer receiver");

    let config = Config::load()?;
    config.create_directories()?;

    let extractor: Box<dyn ReadingExtractor> = if config.server.ocr_enabled {
        let tesseract = TesseractExtractor::new(&config.server.tesseract_bin);
        if !tesseract.is_available() {
            log::warn!("OCR enabled but {} is unavailable, readings will not be extracted", config.server.tesseract_bin);
        }
        Box::new(tesseract)
    } else {
        info!("OCR disabled");
        Box::new(NoExtractor)
    };

    info!(
        "Uploads go to {} (max {} bytes), reading extractor: {}",
        config.server.upload_folder.display(),
        config.server.max_content_length,
        extractor.name()
    );

    let server = Arc::new(ReceiverServer::bind(&config.bind_address(), Receiver::new(config.server.clone(), extractor))?);

    let serving = server.clone();
    let worker = tokio::task::spawn_blocking(move || serving.run());

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    server.shutdown();
    worker.await.context("Receiver thread panicked")?;

    info!("Receiver shut down gracefully");
    Ok(())
}
