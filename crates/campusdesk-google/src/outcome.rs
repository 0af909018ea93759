//! Result shapes handed to front-ends.

use serde::Serialize;

use crate::error::{ApiErrorCode, ApiResult};

/// `{ success, data | error }` as seen by a front-end.
///
/// Session operations return this instead of an error so a UI can render
/// the message without matching on error types.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ApiErrorCode>,
}

impl<T> Outcome<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn failure(code: ApiErrorCode, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            code: Some(code),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Converts back into a `Result`, keeping only the message on failure.
    pub fn into_result(self) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(self.error.unwrap_or_else(|| "unknown error".to_string())),
        }
    }
}

impl<T> From<ApiResult<T>> for Outcome<T> {
    fn from(result: ApiResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => Self::failure(err.code(), err.message()),
        }
    }
}

/// Items from a fan-out fetch, plus how many could not be loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub dropped: usize,
}

impl<T> Listing<T> {
    pub fn new(items: Vec<T>, dropped: usize) -> Self {
        Self { items, dropped }
    }

    /// True when some items were dropped.
    pub fn is_partial(&self) -> bool {
        self.dropped > 0
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for Listing<T> {
    fn default() -> Self {
        Self::new(Vec::new(), 0)
    }
}
