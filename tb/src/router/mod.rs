//! Request routing by detected language

mod detect;
mod route;

pub use detect::{DetectError, Detection, LanguageDetector, ScriptDetector, is_cjk_ideograph};
pub use route::{DEFAULT_MIN_CONFIDENCE, Route, Router};
