// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WordCount driver: composes `texcount` and parses its stderr counters
//! (spec §4.8).

use clsi_core::command::COMPILE_DIR_TOKEN;
use serde::{Deserialize, Serialize};

pub fn wordcount_command(main: &str) -> Vec<String> {
    vec![
        "texcount".to_string(),
        "-inc".to_string(),
        "-nocol".to_string(),
        "-nocodes".to_string(),
        "-nosub".to_string(),
        "-nosum".to_string(),
        "-out-stderr".to_string(),
        format!("{COMPILE_DIR_TOKEN}/{main}"),
    ]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Words {
    pub text_words: u32,
    pub head_words: u32,
    pub outside: u32,
    pub headers: u32,
    pub elements: u32,
    pub math_inline: u32,
    pub math_display: u32,
    pub errors: u32,
}

fn trailing_number(line: &str) -> Option<u32> {
    line.rsplit(':').next()?.trim().parse().ok()
}

/// Parse `texcount`'s `-out-stderr` counters into a [`Words`] record.
pub fn parse_word_count(stderr: &str) -> Words {
    let mut words = Words::default();
    for line in stderr.lines() {
        let lower = line.to_ascii_lowercase();
        if lower.starts_with("words in text") {
            words.text_words = trailing_number(line).unwrap_or(0);
        } else if lower.starts_with("words in headers") {
            words.head_words = trailing_number(line).unwrap_or(0);
        } else if lower.starts_with("words outside text") {
            words.outside = trailing_number(line).unwrap_or(0);
        } else if lower.starts_with("number of headers") {
            words.headers = trailing_number(line).unwrap_or(0);
        } else if lower.starts_with("number of floats") {
            words.elements = trailing_number(line).unwrap_or(0);
        } else if lower.starts_with("number of math inlines") {
            words.math_inline = trailing_number(line).unwrap_or(0);
        } else if lower.starts_with("number of math displayed") {
            words.math_display = trailing_number(line).unwrap_or(0);
        } else if lower.starts_with("(errors:") {
            words.errors = trailing_number(&lower.trim_end_matches(')')).unwrap_or(0);
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_STDERR: &str = "\
Words in text: 1234
Words in headers: 12
Words outside text (captions, etc.): 7
Number of headers: 5
Number of floats/tables/figures: 2
Number of math inlines: 9
Number of math displayed: 1
(errors: 0)
";

    #[test]
    fn parses_full_counter_block() {
        let words = parse_word_count(SAMPLE_STDERR);
        assert_eq!(
            words,
            Words {
                text_words: 1234,
                head_words: 12,
                outside: 7,
                headers: 5,
                elements: 2,
                math_inline: 9,
                math_display: 1,
                errors: 0,
            }
        );
    }

    #[test]
    fn missing_counters_default_to_zero() {
        let words = parse_word_count("Words in text: 42\n");
        assert_eq!(words.text_words, 42);
        assert_eq!(words.headers, 0);
    }

    #[test]
    fn command_includes_stderr_output_flag() {
        let argv = wordcount_command("main.tex");
        assert!(argv.contains(&"-out-stderr".to_string()));
        assert!(argv.last().unwrap().ends_with("/main.tex"));
    }
}
