// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SyncTeX driver: code↔PDF position mapping (spec §4.8).
//!
//! `synctex` emits `Key:Value` lines grouped into records; a new record in
//! the `view` (code→PDF) direction starts at each `Page:` line, and in the
//! `edit` (PDF→code) direction at each `Input:` line.

use clsi_core::command::COMPILE_DIR_TOKEN;

pub fn synctex_code_command(line: u32, column: i32, path: &str, output_pdf: &str) -> Vec<String> {
    vec![
        "synctex".to_string(),
        "view".to_string(),
        "-i".to_string(),
        format!("{line}:{column}:{path}"),
        "-o".to_string(),
        format!("{COMPILE_DIR_TOKEN}/{output_pdf}"),
    ]
}

pub fn synctex_pdf_command(page: u32, h: f64, v: f64, output_pdf: &str) -> Vec<String> {
    vec![
        "synctex".to_string(),
        "edit".to_string(),
        "-o".to_string(),
        format!("{page}:{h}:{v}:{COMPILE_DIR_TOKEN}/{output_pdf}"),
    ]
}

/// A PDF position produced by `synctex view` (code → PDF).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PdfPosition {
    pub page: u32,
    pub h: f64,
    pub v: f64,
    pub width: f64,
    pub height: f64,
}

/// A code position produced by `synctex edit` (PDF → code), with the
/// container-internal `input` path not yet resolved to project-relative.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCodePosition {
    pub input: String,
    pub line: i64,
    pub column: i64,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn key_value(line: &str) -> Option<(&str, &str)> {
    line.split_once(':')
}

pub fn parse_code_to_pdf(stdout: &str) -> Vec<PdfPosition> {
    let mut positions = Vec::new();
    let (mut page, mut h, mut v, mut width, mut height): (Option<u32>, Option<f64>, Option<f64>, Option<f64>, Option<f64>) =
        (None, None, None, None, None);

    let flush = |page: &mut Option<u32>,
                 h: &mut Option<f64>,
                 v: &mut Option<f64>,
                 width: &mut Option<f64>,
                 height: &mut Option<f64>,
                 out: &mut Vec<PdfPosition>| {
        if let (Some(p), Some(hh), Some(vv)) = (*page, *h, *v) {
            out.push(PdfPosition {
                page: p,
                h: round2(hh),
                v: round2(vv),
                width: round2(width.unwrap_or(0.0)),
                height: round2(height.unwrap_or(0.0)),
            });
        }
        *page = None;
        *h = None;
        *v = None;
        *width = None;
        *height = None;
    };

    for line in stdout.lines() {
        let Some((key, value)) = key_value(line) else { continue };
        match key {
            "Page" => {
                flush(&mut page, &mut h, &mut v, &mut width, &mut height, &mut positions);
                page = value.trim().parse().ok();
            }
            "h" => h = value.trim().parse().ok(),
            "v" => v = value.trim().parse().ok(),
            "W" => width = value.trim().parse().ok(),
            "H" => height = value.trim().parse().ok(),
            _ => {}
        }
    }
    flush(&mut page, &mut h, &mut v, &mut width, &mut height, &mut positions);
    positions
}

pub fn parse_pdf_to_code(stdout: &str) -> Vec<RawCodePosition> {
    let mut positions = Vec::new();
    let (mut input, mut line_no, mut column): (Option<String>, Option<i64>, Option<i64>) = (None, None, None);

    let flush = |input: &mut Option<String>, line_no: &mut Option<i64>, column: &mut Option<i64>, out: &mut Vec<RawCodePosition>| {
        if let Some(i) = input.take() {
            out.push(RawCodePosition { input: i, line: line_no.unwrap_or(0), column: column.unwrap_or(-1) });
        }
        *line_no = None;
        *column = None;
    };

    for raw_line in stdout.lines() {
        let Some((key, value)) = key_value(raw_line) else { continue };
        match key {
            "Input" => {
                flush(&mut input, &mut line_no, &mut column, &mut positions);
                input = Some(value.trim().to_string());
            }
            "Line" => line_no = value.trim().parse().ok(),
            "Column" => column = value.trim().parse().ok(),
            _ => {}
        }
    }
    flush(&mut input, &mut line_no, &mut column, &mut positions);
    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_view_record() {
        let stdout = "SyncTeX result begin\nOutput:output.pdf\nPage:1\nh:72.26999\nv:100.0\nW:300.125\nH:10.0\nSyncTeX result end\n";
        let positions = parse_code_to_pdf(stdout);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0], PdfPosition { page: 1, h: 72.27, v: 100.0, width: 300.13, height: 10.0 });
    }

    #[test]
    fn parses_multiple_view_records() {
        let stdout = "Output:output.pdf\nPage:1\nh:1.0\nv:2.0\nW:3.0\nH:4.0\nPage:2\nh:5.0\nv:6.0\nW:7.0\nH:8.0\n";
        let positions = parse_code_to_pdf(stdout);
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[1].page, 2);
    }

    #[test]
    fn parses_edit_record_with_input_line_column() {
        let stdout = "Output:output.pdf\nInput:/compile/main.tex\nLine:12\nColumn:3\n";
        let positions = parse_pdf_to_code(stdout);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0], RawCodePosition { input: "/compile/main.tex".into(), line: 12, column: 3 });
    }

    #[test]
    fn empty_stdout_yields_no_records() {
        assert!(parse_code_to_pdf("").is_empty());
        assert!(parse_pdf_to_code("").is_empty());
    }
}
