//! Ordered list of non-fatal diagnostics collected during a load.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single diagnostic: the error kind plus an optional numeric context,
/// typically the index of the offending section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub context: Option<u64>,
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.context {
            Some(context) => write!(f, "{}: {} ({})", self.kind.category(), self.kind, context),
            None => write!(f, "{}: {}", self.kind.category(), self.kind),
        }
    }
}

/// Append-only diagnostics list.
///
/// Entries keep the order in which they were discovered and are never
/// deduplicated: the same kind may appear several times with different
/// contexts (or even the same context).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorList {
    errors: Vec<ErrorInfo>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, kind: impl Into<ErrorKind>) {
        self.errors.push(ErrorInfo {
            kind: kind.into(),
            context: None,
        });
    }

    pub fn add_error_with_context(&mut self, kind: impl Into<ErrorKind>, context: u64) {
        self.errors.push(ErrorInfo {
            kind: kind.into(),
            context: Some(context),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_error(&self, kind: impl Into<ErrorKind>) -> bool {
        let kind = kind.into();
        self.errors.iter().any(|e| e.kind == kind)
    }

    pub fn has_error_with_context(&self, kind: impl Into<ErrorKind>, context: u64) -> bool {
        let kind = kind.into();
        self.errors
            .iter()
            .any(|e| e.kind == kind && e.context == Some(context))
    }

    pub fn errors(&self) -> &[ErrorInfo] {
        &self.errors
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ErrorInfo> {
        self.errors.iter()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }
}

impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a ErrorInfo;
    type IntoIter = std::slice::Iter<'a, ErrorInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}
