//! Language classification and channel selection

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::detect::{LanguageDetector, ScriptDetector, is_cjk_ideograph};
use crate::config::{DetectorKind, RouterConfig, TopicsConfig};
use crate::domain::{Language, ResponderType};

/// Detector confidence required before its verdict is trusted
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;

/// Where one piece of text should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub language: Language,
    pub channel: String,
}

/// Routes request text to a responder channel
///
/// Classification order:
/// 1. a confident detector verdict for a Chinese-family code
/// 2. any character in U+4E00..=U+9FFF
/// 3. English
///
/// Detector errors and low-confidence verdicts fall through to rule 2.
pub struct Router {
    detector: Option<Arc<dyn LanguageDetector>>,
    min_confidence: f64,
    routes: HashMap<Language, String>,
}

impl Router {
    /// Build a router with one routing entry per supported language
    pub fn new(topics: &TopicsConfig) -> Self {
        debug!(?topics, "Router::new: called");
        let routes = Language::ALL
            .into_iter()
            .map(|language| {
                let responder = ResponderType::for_language(language);
                (language, topics.for_responder(responder).to_string())
            })
            .collect();

        Self {
            detector: None,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            routes,
        }
    }

    /// Build a router with the configured detector
    pub fn from_config(topics: &TopicsConfig, config: &RouterConfig) -> Self {
        let router = Self::new(topics);
        match config.detector {
            DetectorKind::Script => router.with_detector(Arc::new(ScriptDetector::new()), config.min_confidence),
            DetectorKind::None => router,
        }
    }

    /// Attach a language detector
    pub fn with_detector(mut self, detector: Arc<dyn LanguageDetector>, min_confidence: f64) -> Self {
        debug!(min_confidence, "Router::with_detector: called");
        self.detector = Some(detector);
        self.min_confidence = min_confidence;
        self
    }

    /// Classify text into a supported language
    pub fn classify(&self, text: &str) -> Language {
        debug!(text_len = text.len(), "Router::classify: called");
        if let Some(detector) = &self.detector {
            match detector.detect(text) {
                Ok(detection) if detection.is_chinese() && detection.confidence >= self.min_confidence => {
                    debug!(?detection, "Router::classify: detector reports chinese");
                    return Language::Chinese;
                }
                Ok(detection) => {
                    debug!(?detection, "Router::classify: detector verdict not used");
                }
                Err(e) => {
                    debug!(error = %e, "Router::classify: detector failed, falling back to script rule");
                }
            }
        }

        if text.chars().any(is_cjk_ideograph) {
            debug!("Router::classify: contains CJK ideograph");
            return Language::Chinese;
        }

        debug!("Router::classify: defaulting to english");
        Language::English
    }

    /// Channel serving a language
    pub fn select_channel(&self, language: Language) -> &str {
        debug!(%language, "Router::select_channel: called");
        // Every Language variant is inserted in new()
        &self.routes[&language]
    }

    /// Classify and select in one step
    pub fn route(&self, text: &str) -> Route {
        let language = self.classify(text);
        Route {
            language,
            channel: self.select_channel(language).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{DetectError, Detection};
    use proptest::prelude::*;

    struct FixedDetector {
        code: &'static str,
        confidence: f64,
    }

    impl LanguageDetector for FixedDetector {
        fn detect(&self, _text: &str) -> Result<Detection, DetectError> {
            Ok(Detection {
                code: self.code.to_string(),
                confidence: self.confidence,
            })
        }
    }

    struct FailingDetector;

    impl LanguageDetector for FailingDetector {
        fn detect(&self, _text: &str) -> Result<Detection, DetectError> {
            Err(DetectError::Failed("model not loaded".to_string()))
        }
    }

    fn router() -> Router {
        Router::new(&TopicsConfig::default())
    }

    #[test]
    fn test_select_channel() {
        let r = router();
        assert_eq!(r.select_channel(Language::Chinese), "chinese_teacher");
        assert_eq!(r.select_channel(Language::English), "english_teacher");
    }

    #[test]
    fn test_route_examples() {
        let r = router();
        assert_eq!(
            r.route("Hello, how are you?"),
            Route {
                language: Language::English,
                channel: "english_teacher".to_string()
            }
        );
        assert_eq!(r.route("你好，今天天气怎么样？").language, Language::Chinese);
    }

    #[test]
    fn test_confident_detector_wins() {
        // Romanised Chinese with no ideographs
        let r = router().with_detector(
            Arc::new(FixedDetector {
                code: "zh-tw",
                confidence: 0.9,
            }),
            0.5,
        );
        assert_eq!(r.classify("ni hao"), Language::Chinese);
    }

    #[test]
    fn test_low_confidence_detector_ignored() {
        let r = router().with_detector(
            Arc::new(FixedDetector {
                code: "zh",
                confidence: 0.2,
            }),
            0.5,
        );
        assert_eq!(r.classify("ni hao"), Language::English);
    }

    #[test]
    fn test_detector_failure_falls_through() {
        let r = router().with_detector(Arc::new(FailingDetector), 0.5);
        assert_eq!(r.classify("学习"), Language::Chinese);
        assert_eq!(r.classify("study"), Language::English);
    }

    #[test]
    fn test_empty_text_is_english() {
        assert_eq!(router().classify(""), Language::English);
    }

    #[test]
    fn test_custom_topics() {
        let topics = TopicsConfig {
            chinese_teacher: "zh-pool".to_string(),
            english_teacher: "en-pool".to_string(),
            ..Default::default()
        };
        let r = Router::new(&topics);
        assert_eq!(r.route("漢字").channel, "zh-pool");
        assert_eq!(r.route("kanji").channel, "en-pool");
    }

    #[test]
    fn test_from_config_detector_kind() {
        let topics = TopicsConfig::default();
        let none = RouterConfig {
            detector: DetectorKind::None,
            ..Default::default()
        };
        assert!(Router::from_config(&topics, &none).detector.is_none());

        let script = Router::from_config(&topics, &RouterConfig::default());
        assert!(script.detector.is_some());
        assert_eq!(script.route("今天").channel, "chinese_teacher");
    }

    proptest! {
        #[test]
        fn prop_cjk_text_is_chinese(
            prefix in "[ -~]{0,40}",
            ideograph in proptest::char::range('\u{4E00}', '\u{9FFF}'),
            suffix in "[ -~]{0,40}",
        ) {
            let text = format!("{prefix}{ideograph}{suffix}");
            prop_assert_eq!(router().classify(&text), Language::Chinese);

            let english_biased = router().with_detector(
                Arc::new(FixedDetector { code: "en", confidence: 1.0 }),
                0.5,
            );
            prop_assert_eq!(english_biased.classify(&text), Language::Chinese);

            let failing = router().with_detector(Arc::new(FailingDetector), 0.5);
            prop_assert_eq!(failing.classify(&text), Language::Chinese);
        }

        #[test]
        fn prop_ascii_text_is_english(text in "[ -~]{0,200}") {
            prop_assert_eq!(router().classify(&text), Language::English);

            let with_script = router().with_detector(Arc::new(ScriptDetector::new()), 0.5);
            prop_assert_eq!(with_script.classify(&text), Language::English);
        }
    }
}
