//! Matching OCR output against the reading the user typed.

/// One piece of recognised text and the recogniser's confidence in it (0.0..=1.0).
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub text: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

const MIN_READING_LEN: usize = 4;
const MAX_READING_LEN: usize = 8;

/// Does an OCR reading plausibly agree with the user's reading?
///
/// Accepts an exact match, either one containing the other, or equal length with at most
/// one differing digit. Readings shorter than 4 or longer than 8 digits never match.
pub fn validate_reading(reading: &str, user_reading: &str) -> bool {
    if reading.is_empty() {
        return false;
    }

    let len = reading.chars().count();
    if !(MIN_READING_LEN..=MAX_READING_LEN).contains(&len) {
        log::debug!("Reading {:?} rejected: length {}", reading, len);
        return false;
    }

    if reading == user_reading {
        return true;
    }

    if reading.contains(user_reading) || user_reading.contains(reading) {
        return true;
    }

    if len == user_reading.chars().count() {
        let differences = reading
            .chars()
            .zip(user_reading.chars())
            .filter(|(a, b)| a != b)
            .count();
        if differences <= 1 {
            return true;
        }
    }

    false
}

/// Pick the reading to report from raw detections.
///
/// Detections are reduced to their digits and ranked by confidence. The first one that
/// validates against `user_reading` wins; otherwise the most confident one is returned.
pub fn select_reading(detections: &[Detection], user_reading: &str) -> Option<String> {
    let mut candidates: Vec<(String, f32)> = detections
        .iter()
        .filter_map(|d| {
            let digits: String = d.text.chars().filter(|c| c.is_ascii_digit()).collect();
            (!digits.is_empty()).then_some((digits, d.confidence))
        })
        .collect();

    if candidates.is_empty() {
        log::info!("No readings found");
        return None;
    }

    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

    if let Some((reading, confidence)) = candidates
        .iter()
        .find(|(reading, _)| validate_reading(reading, user_reading))
    {
        log::info!("Valid reading found: {} (confidence {:.2})", reading, confidence);
        return Some(reading.clone());
    }

    let (best, confidence) = &candidates[0];
    log::info!("No valid reading found, using highest confidence: {} ({:.2})", best, confidence);
    Some(best.clone())
}
