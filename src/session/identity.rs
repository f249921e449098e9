use std::fmt;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Local validation failures. Always recoverable: the user retries immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please enter a valid 10-digit ID number.")]
    InvalidSubjectId,
    #[error("Please enter your full name (first and last name).")]
    IncompleteName,
    #[error("You must enter your ID number before continuing.")]
    MissingSubjectId,
    #[error("Only PDF, CSV or XLSX files are accepted (got \"{0}\").")]
    UnsupportedAttachment(String),
}

fn subject_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9]{10}$").expect("static pattern"))
}

/// A validated 10-digit subject id (the national ID number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

impl SubjectId {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if subject_id_pattern().is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(ValidationError::InvalidSubjectId)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Log-safe form: only the last four digits are kept.
    pub fn masked(&self) -> String {
        format!("******{}", &self.0[6..])
    }
}

impl TryFrom<String> for SubjectId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SubjectId> for String {
    fn from(value: SubjectId) -> Self {
        value.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalizes a full name: at least two whitespace-separated tokens, single-spaced.
pub fn validate_full_name(raw: &str) -> Result<String, ValidationError> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.len() < 2 {
        return Err(ValidationError::IncompleteName);
    }
    Ok(tokens.join(" "))
}
