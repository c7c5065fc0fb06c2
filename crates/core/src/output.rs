// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OutputFile: one artifact produced by a compile (spec §3).

use crate::build_id::BuildId;
use crate::namespace::Namespace;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFileType {
    Pdf,
    Log,
    Synctex,
    Other,
}

impl OutputFileType {
    pub fn from_path(path: &str) -> Self {
        match path.rsplit_once('.') {
            Some((_, "pdf")) => Self::Pdf,
            Some((_, "log")) => Self::Log,
            _ if path.ends_with(".synctex.gz") || path.ends_with(".synctex") => Self::Synctex,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputFile {
    pub build: BuildId,
    pub download_path: String,
    pub path: String,
    #[serde(rename = "type")]
    pub file_type: OutputFileType,
    pub size: Option<u64>,
}

impl OutputFile {
    pub fn new(namespace: &Namespace, build: BuildId, path: impl Into<String>, size: Option<u64>) -> Self {
        let path = path.into();
        let file_type = OutputFileType::from_path(&path);
        let download_path = format!("/project/{namespace}/compile-output/{build}/{path}");
        Self { build, download_path, path, file_type, size }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_path_has_expected_shape() {
        let ns = Namespace::new("11111111-1111-1111-1111-111111111111", "22222222-2222-2222-2222-222222222222");
        let build = BuildId::from_parts(1, 2);
        let of = OutputFile::new(&ns, build, "output.pdf", Some(1234));
        assert_eq!(
            of.download_path,
            format!("/project/{ns}/compile-output/{build}/output.pdf")
        );
        assert_eq!(of.file_type, OutputFileType::Pdf);
    }

    #[test]
    fn file_type_classification() {
        assert_eq!(OutputFileType::from_path("output.log"), OutputFileType::Log);
        assert_eq!(OutputFileType::from_path("output.synctex.gz"), OutputFileType::Synctex);
        assert_eq!(OutputFileType::from_path("main.aux"), OutputFileType::Other);
    }
}
