// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compile-request resources: inline docs or URL-backed files (spec §3).

use crate::error::ClsiError;
use serde::{Deserialize, Serialize};

/// One resource in a compile request. Exactly one resource per request is
/// the "root doc" (tracked out-of-band by `CompileRequest::root_resource_path`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourceKind {
    Doc { content: String, version: u64 },
    File { url: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub path: String,
    #[serde(flatten)]
    pub kind: ResourceKind,
}

impl Resource {
    pub fn doc(path: impl Into<String>, content: impl Into<String>, version: u64) -> Self {
        Self { path: path.into(), kind: ResourceKind::Doc { content: content.into(), version } }
    }

    pub fn file(path: impl Into<String>, url: impl Into<String>) -> Self {
        Self { path: path.into(), kind: ResourceKind::File { url: url.into() } }
    }

    pub fn is_doc(&self) -> bool {
        matches!(self.kind, ResourceKind::Doc { .. })
    }

    pub fn as_doc(&self) -> Option<(&str, u64)> {
        match &self.kind {
            ResourceKind::Doc { content, version } => Some((content.as_str(), *version)),
            ResourceKind::File { .. } => None,
        }
    }

    pub fn validate(&self) -> Result<(), ClsiError> {
        validate_path(&self.path)
    }
}

/// Project-relative path validation: non-empty, no leading `/`, no `..` segments.
pub fn validate_path(path: &str) -> Result<(), ClsiError> {
    if path.is_empty() {
        return Err(ClsiError::Validation("resource path is empty".into()));
    }
    if path.starts_with('/') {
        return Err(ClsiError::Validation(format!("resource path must be relative: {path}")));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(ClsiError::Validation(format!("resource path contains '..': {path}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_path() {
        assert!(validate_path("").is_err());
    }

    #[test]
    fn rejects_leading_slash() {
        assert!(validate_path("/etc/passwd").is_err());
    }

    #[test]
    fn rejects_dotdot_segment() {
        assert!(validate_path("a/../../etc/passwd").is_err());
        assert!(validate_path("..").is_err());
    }

    #[test]
    fn accepts_ordinary_relative_path() {
        assert!(validate_path("chapters/intro.tex").is_ok());
    }

    #[test]
    fn accepts_dotdot_inside_a_filename() {
        // "..foo" is not a path-traversal segment, only a bare ".." is.
        assert!(validate_path("weird..name.tex").is_ok());
    }
}
