//! Language detection capability

use thiserror::Error;
use tracing::debug;

/// Errors a detector may report; the router treats all of them as "no opinion"
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("No linguistic content to detect")]
    NoContent,

    #[error("Detector failure: {0}")]
    Failed(String),
}

/// A detector's verdict for one text
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Language code, e.g. "en", "zh-cn", "ja"
    pub code: String,
    /// Confidence in [0.0, 1.0]
    pub confidence: f64,
}

impl Detection {
    /// Whether the code names a Chinese-family language
    pub fn is_chinese(&self) -> bool {
        let code = self.code.to_ascii_lowercase();
        code == "zh" || code.starts_with("zh-") || code.starts_with("zh_")
    }
}

/// Pluggable language detection
pub trait LanguageDetector: Send + Sync {
    fn detect(&self, text: &str) -> Result<Detection, DetectError>;
}

/// CJK Unified Ideographs block
pub fn is_cjk_ideograph(c: char) -> bool {
    ('\u{4E00}'..='\u{9FFF}').contains(&c)
}

fn is_kana(c: char) -> bool {
    ('\u{3040}'..='\u{30FF}').contains(&c)
}

fn is_hangul(c: char) -> bool {
    ('\u{AC00}'..='\u{D7AF}').contains(&c) || ('\u{1100}'..='\u{11FF}').contains(&c)
}

/// Detector that votes by Unicode script
///
/// Counts letters per script and reports the dominant one. Confidence is the
/// dominant script's share of all counted letters. Japanese text is
/// recognised by any kana, since it mixes kana with Han.
#[derive(Debug, Default, Clone)]
pub struct ScriptDetector;

impl ScriptDetector {
    pub fn new() -> Self {
        Self
    }
}

impl LanguageDetector for ScriptDetector {
    fn detect(&self, text: &str) -> Result<Detection, DetectError> {
        debug!(text_len = text.len(), "ScriptDetector::detect: called");
        let (mut han, mut kana, mut hangul, mut latin) = (0usize, 0usize, 0usize, 0usize);

        for c in text.chars() {
            if is_cjk_ideograph(c) {
                han += 1;
            } else if is_kana(c) {
                kana += 1;
            } else if is_hangul(c) {
                hangul += 1;
            } else if c.is_ascii_alphabetic() {
                latin += 1;
            }
        }

        let total = han + kana + hangul + latin;
        if total == 0 {
            debug!("ScriptDetector::detect: no letters");
            return Err(DetectError::NoContent);
        }

        let (code, count) = if kana > 0 {
            ("ja", kana + han)
        } else {
            [("zh-cn", han), ("ko", hangul), ("en", latin)]
                .into_iter()
                .max_by_key(|(_, n)| *n)
                .unwrap_or(("en", latin))
        };

        let detection = Detection {
            code: code.to_string(),
            confidence: count as f64 / total as f64,
        };
        debug!(?detection, "ScriptDetector::detect: result");
        Ok(detection)
    }
}
