// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RootDocAlias preprocessing pass: some TikZ/PSTricks workflows compile
//! external graphics by invoking `latex`/`pdflatex` on the root doc under a
//! fixed jobname of `output`. Tools that key off of that filename (rather
//! than the true main file) expect an `output.tex` sibling, so when the
//! root doc requests externalization and the project doesn't already
//! provide one, clone the root doc into an `output.tex` resource (spec §4.2
//! step 2).

use clsi_core::resource::Resource;

const MARKERS: [&str; 2] = ["\\tikzexternalize", "{pstool}"];

const ALIAS_PATH: &str = "output.tex";

/// Build the `output.tex` alias resource for this compile, if the root doc
/// needs one and the project doesn't already provide a resource at that path.
pub fn alias_for(root_content: &str, root_version: u64, resources: &[Resource]) -> Option<Resource> {
    let needs_alias = MARKERS.iter().any(|marker| root_content.contains(marker));
    if !needs_alias {
        return None;
    }
    if resources.iter().any(|resource| resource.path == ALIAS_PATH) {
        return None;
    }
    Some(Resource::doc(ALIAS_PATH, root_content, root_version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_root_doc_when_tikzexternalize_present() {
        let root = "\\documentclass{article}\\tikzexternalize\\begin{document}\\end{document}";
        let alias = alias_for(root, 1, &[]);
        let alias = alias.expect("expected an alias resource");
        assert_eq!(alias.path, ALIAS_PATH);
        assert_eq!(alias.as_doc(), Some((root, 1)));
    }

    #[test]
    fn clones_root_doc_when_pstool_present() {
        let root = "\\usepackage{pstool}";
        assert!(alias_for(root, 1, &[]).is_some());
    }

    #[test]
    fn no_alias_when_no_marker_present() {
        let root = "\\documentclass{article}\\begin{document}Hi\\end{document}";
        assert!(alias_for(root, 1, &[]).is_none());
    }

    #[test]
    fn no_alias_when_output_tex_already_a_resource() {
        let root = "\\tikzexternalize";
        let existing = vec![Resource::doc(ALIAS_PATH, "already here", 1)];
        assert!(alias_for(root, 1, &existing).is_none());
    }
}
