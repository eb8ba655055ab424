//! Reply and responder type definitions

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cost::CostRecord;
use super::request::{Language, RequestId};

/// The fixed set of responder pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponderType {
    ChineseTeacher,
    EnglishTeacher,
}

impl ResponderType {
    pub const ALL: [ResponderType; 2] = [ResponderType::ChineseTeacher, ResponderType::EnglishTeacher];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponderType::ChineseTeacher => "chinese_teacher",
            ResponderType::EnglishTeacher => "english_teacher",
        }
    }

    /// Responder pool serving a language
    pub fn for_language(language: Language) -> Self {
        match language {
            Language::Chinese => ResponderType::ChineseTeacher,
            Language::English => ResponderType::EnglishTeacher,
        }
    }

    /// Consumer group shared by every worker of this responder type
    pub fn group_id(&self) -> String {
        format!("{}_group", self.as_str())
    }
}

impl fmt::Display for ResponderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A responder's answer to one Request
///
/// Never mutated after creation; consumed once by the waiting caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub message_id: RequestId,
    pub success: bool,
    pub content: String,
    pub agent_type: ResponderType,
    pub cost_info: CostRecord,
    /// Processing duration in seconds
    pub response_time: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reply {
    pub fn success(
        message_id: RequestId,
        agent_type: ResponderType,
        content: impl Into<String>,
        cost_info: CostRecord,
        elapsed: Duration,
    ) -> Self {
        Self {
            message_id,
            success: true,
            content: content.into(),
            agent_type,
            cost_info,
            response_time: elapsed.as_secs_f64(),
            timestamp: Utc::now(),
        }
    }

    /// Failed reply; the content carries the error description
    pub fn failure(
        message_id: RequestId,
        agent_type: ResponderType,
        error: impl Into<String>,
        cost_info: CostRecord,
        elapsed: Duration,
    ) -> Self {
        Self {
            message_id,
            success: false,
            content: error.into(),
            agent_type,
            cost_info,
            response_time: elapsed.as_secs_f64(),
            timestamp: Utc::now(),
        }
    }
}
