// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! clsi-drivers: pure command-line composers and small parsers for LaTeX,
//! SyncTeX, and WordCount (spec §4.8), plus the Draft and RootDocAlias
//! preprocessing passes (spec §4.2 step 1-2).

pub mod draft;
pub mod latex;
pub mod root_doc_alias;
pub mod synctex;
pub mod wordcount;

pub use latex::compose_latexmk;
pub use synctex::{parse_code_to_pdf, parse_pdf_to_code, synctex_code_command, synctex_pdf_command};
pub use wordcount::{parse_word_count, wordcount_command, Words};
