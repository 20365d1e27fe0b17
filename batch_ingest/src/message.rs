use std::fmt;

use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubjectError {
    #[error("invalid subject: {0:?}")]
    InvalidSubject(String),

    #[error("wildcards are not allowed in a published subject: {0:?}")]
    WildcardNotAllowed(String),
}

/// A bus subject, or a subscription pattern over subjects.
///
/// Tokens are separated by `.`. A pattern may use `*` to match exactly one
/// token and a trailing `>` to match one or more tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject {
    name: String,
}

impl Subject {
    /// Check that the pattern is valid and build a subscription subject.
    pub fn new(name: &str) -> Result<Subject, SubjectError> {
        if !Self::is_valid(name) {
            return Err(SubjectError::InvalidSubject(name.to_string()));
        }
        Ok(Subject {
            name: name.to_string(),
        })
    }

    /// Check that the name is a concrete subject, one messages can be published on.
    pub fn new_concrete(name: &str) -> Result<Subject, SubjectError> {
        let subject = Self::new(name)?;
        if subject.has_wildcards() {
            return Err(SubjectError::WildcardNotAllowed(name.to_string()));
        }
        Ok(subject)
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn has_wildcards(&self) -> bool {
        self.name.split('.').any(|t| t == "*" || t == ">")
    }

    /// Check if a concrete subject matches this pattern.
    pub fn matches(&self, subject: &str) -> bool {
        let mut pattern = self.name.split('.');
        let mut tokens = subject.split('.');

        loop {
            match (pattern.next(), tokens.next()) {
                (Some(">"), Some(_)) => return true,
                (Some("*"), Some(_)) => continue,
                (Some(p), Some(t)) if p == t => continue,
                (None, None) => return true,
                _ => return false,
            }
        }
    }

    fn is_valid(name: &str) -> bool {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return false;
        }

        let tokens: Vec<&str> = name.split('.').collect();
        let last = tokens.len() - 1;
        tokens.iter().enumerate().all(|(i, token)| match *token {
            "" => false,
            ">" => i == last,
            t => t == "*" || !t.contains(['*', '>']),
        })
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl TryFrom<&str> for Subject {
    type Error = SubjectError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Subject::new(name)
    }
}

/// A message as received from the bus. The payload is opaque to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub subject: String,
    pub payload: Bytes,
    pub reply: Option<String>,
}

impl RawMessage {
    pub fn new<B>(subject: impl Into<String>, payload: B) -> RawMessage
    where
        B: Into<Bytes>,
    {
        RawMessage {
            subject: subject.into(),
            payload: payload.into(),
            reply: None,
        }
    }

    pub fn payload_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }
}
