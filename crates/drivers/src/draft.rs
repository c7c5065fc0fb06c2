// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Draft preprocessing pass: injects the `draft` class option into
//! `\documentclass` (spec §4.2 step 1). Idempotent — running twice produces
//! the same document as running once.

const MACRO: &str = "\\documentclass";

/// Inject `draft` into the root doc's `\documentclass[...]{...}` options.
/// No-op if `\documentclass` is absent or `draft` is already an option.
pub fn inject_draft(content: &str) -> String {
    let Some(macro_start) = content.find(MACRO) else { return content.to_string() };
    let after_macro = macro_start + MACRO.len();
    let rest = &content[after_macro..];

    if let Some(options_start) = rest.find('[') {
        // Only treat `[` as the options bracket if nothing but whitespace
        // precedes it (otherwise it belongs to a later macro entirely).
        if rest[..options_start].trim().is_empty() {
            if let Some(options_end) = rest[options_start..].find(']') {
                let options_end = options_start + options_end;
                let options = &rest[options_start + 1..options_end];
                if options.split(',').any(|opt| opt.trim() == "draft") {
                    return content.to_string();
                }
                let new_options =
                    if options.trim().is_empty() { "draft".to_string() } else { format!("{options},draft") };
                return format!(
                    "{}{}[{}]{}",
                    &content[..after_macro],
                    &rest[..options_start],
                    new_options,
                    &rest[options_end + 1..]
                );
            }
        }
    }

    // No options bracket at all: insert one right after `\documentclass`.
    format!("{}[draft]{}", &content[..after_macro], rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_draft_when_no_options_present() {
        let input = "\\documentclass{article}\\begin{document}Hi\\end{document}";
        let output = inject_draft(input);
        assert_eq!(output, "\\documentclass[draft]{article}\\begin{document}Hi\\end{document}");
    }

    #[test]
    fn appends_draft_to_existing_options() {
        let input = "\\documentclass[11pt]{article}";
        assert_eq!(inject_draft(input), "\\documentclass[11pt,draft]{article}");
    }

    #[test]
    fn is_idempotent_when_draft_already_present() {
        let input = "\\documentclass[draft]{article}";
        assert_eq!(inject_draft(input), input);
        let twice = inject_draft(&inject_draft(input));
        assert_eq!(twice, input);
    }

    #[test]
    fn idempotent_across_double_application_from_bare_class() {
        let input = "\\documentclass{article}";
        let once = inject_draft(input);
        let twice = inject_draft(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn leaves_document_without_documentclass_untouched() {
        let input = "\\begin{document}Hi\\end{document}";
        assert_eq!(inject_draft(input), input);
    }
}
