//! Reading extraction from stored odometer images.

use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, Context, Result};

use crate::reading::Detection;

pub trait ReadingExtractor: Send + Sync {
    /// Recognise digit groups in the image at `image_path`.
    fn detect(&self, image_path: &Path) -> Result<Vec<Detection>>;

    fn name(&self) -> &str;

    fn is_available(&self) -> bool;
}

/// Runs the `tesseract` CLI restricted to digits and reads its TSV word table.
pub struct TesseractExtractor {
    binary: String,
    is_available: bool,
}

impl TesseractExtractor {
    pub fn new(binary: &str) -> Self {
        let is_available = match Command::new(binary).arg("--version").output() {
            Ok(output) if output.status.success() => {
                log::info!("OCR available ({})", String::from_utf8_lossy(&output.stdout).lines().next().unwrap_or(binary));
                true
            }
            Ok(output) => {
                log::warn!("{} --version failed with status: {}", binary, output.status);
                false
            }
            Err(e) => {
                log::warn!("{} not found: {}", binary, e);
                false
            }
        };
        Self {
            binary: binary.to_string(),
            is_available,
        }
    }
}

impl ReadingExtractor for TesseractExtractor {
    fn detect(&self, image_path: &Path) -> Result<Vec<Detection>> {
        if !self.is_available {
            return Err(anyhow!("{} is not available", self.binary));
        }

        let output = Command::new(&self.binary)
            .arg(image_path)
            .arg("stdout")
            .args(["--psm", "11", "-c", "tessedit_char_whitelist=0123456789", "tsv"])
            .output()
            .with_context(|| format!("Failed to run {}", self.binary))?;

        if !output.status.success() {
            return Err(anyhow!(
                "{} failed with status {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let detections = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        log::debug!("Raw OCR detections: {:?}", detections);
        Ok(detections)
    }

    fn name(&self) -> &str {
        "tesseract"
    }

    fn is_available(&self) -> bool {
        self.is_available
    }
}

/// Word rows of tesseract's TSV output as detections. Confidence is scaled to 0.0..=1.0.
pub fn parse_tsv(tsv: &str) -> Vec<Detection> {
    tsv.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 12 {
                return None;
            }
            let confidence: f32 = cols[10].trim().parse().ok()?;
            let text = cols[11].trim();
            if confidence < 0.0 || text.is_empty() {
                return None;
            }
            Some(Detection::new(text, confidence / 100.0))
        })
        .collect()
}

/// Used when OCR is disabled: every extraction comes back empty.
pub struct NoExtractor;

impl ReadingExtractor for NoExtractor {
    fn detect(&self, _image_path: &Path) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "disabled"
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t\n\
5\t1\t1\t1\t1\t1\t120\t200\t180\t40\t91.5\t012345\n\
5\t1\t1\t1\t1\t2\t320\t200\t40\t40\t33\t7\n\
5\t1\t2\t1\t1\t1\t10\t10\t5\t5\t60\t \n";

    #[test]
    fn test_parse_tsv_words() {
        let detections = parse_tsv(SAMPLE_TSV);
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].text, "012345");
        assert!((detections[0].confidence - 0.915).abs() < 1e-6);
        assert_eq!(detections[1].text, "7");
    }

    #[test]
    fn test_parse_tsv_garbage() {
        assert!(parse_tsv("").is_empty());
        assert!(parse_tsv("header\nnot\ta\ttsv\trow").is_empty());
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let extractor = TesseractExtractor::new("odocam-no-such-ocr-binary");
        assert!(!extractor.is_available());
        assert!(extractor.detect(Path::new("/tmp/x.jpg")).is_err());
    }
}
