// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! LaTeX driver: composes the `latexmk` command line (spec §4.8).

use clsi_core::command::{CommandOptions, COMPILE_DIR_TOKEN};
use clsi_core::compile::{Check, CompileOptions};
use std::time::Duration;

/// Extensions rewritten to `.tex` for the `latexmk` jobname/main-file
/// argument (spec §4.8 "Main file").
const REWRITTEN_EXTENSIONS: [&str; 3] = ["md", "Rtx", "Rmd"];

fn main_file(root_resource_path: &str) -> String {
    match root_resource_path.rsplit_once('.') {
        Some((stem, ext)) if REWRITTEN_EXTENSIONS.contains(&ext) => format!("{stem}.tex"),
        _ => root_resource_path.to_string(),
    }
}

/// Compose the `latexmk` invocation for one compile request.
pub fn compose_latexmk(options: &CompileOptions, timeout: Duration) -> CommandOptions {
    let main = main_file(&options.root_resource_path);
    let argv = vec![
        "latexmk".to_string(),
        "-cd".to_string(),
        "-f".to_string(),
        "-jobname=output".to_string(),
        format!("-auxdir={COMPILE_DIR_TOKEN}"),
        format!("-outdir={COMPILE_DIR_TOKEN}"),
        "-synctex=1".to_string(),
        "-interaction=batchmode".to_string(),
        options.compiler.flag().to_string(),
        format!("{COMPILE_DIR_TOKEN}/{main}"),
    ];

    let mut command = CommandOptions::new(argv, options.image_name.clone(), timeout);
    match options.check {
        Check::Error => {
            command = command
                .with_env("CHKTEX_OPTIONS", "-nall -e9 -e10 -w15 -w16")
                .with_env("CHKTEX_EXIT_ON_ERROR", "1")
                .with_env("CHKTEX_ULIMIT_OPTIONS", "-t 5 -v 64000");
        }
        Check::Validate => {
            command = command
                .with_env("CHKTEX_OPTIONS", "-nall -e9 -e10 -w15 -w16")
                .with_env("CHKTEX_ULIMIT_OPTIONS", "-t 5 -v 64000");
        }
        Check::Normal => {}
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use clsi_core::compile::Compiler;
    use clsi_core::sync_state::{SyncState, SyncType};

    fn base_options(root: &str) -> CompileOptions {
        CompileOptions {
            check: Check::Normal,
            compiler: Compiler::Pdflatex,
            compile_group: "standard".into(),
            draft: false,
            image_name: "texlive:2024".into(),
            root_resource_path: root.into(),
            sync_state: SyncState::from("v1"),
            sync_type: SyncType::FullIncremental,
            timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn rewrites_rmd_to_tex_main_file() {
        let options = base_options("main.Rmd");
        let cmd = compose_latexmk(&options, Duration::from_secs(60));
        assert!(cmd.argv.last().unwrap().ends_with("/main.tex"));
    }

    #[test]
    fn leaves_tex_extension_untouched() {
        let options = base_options("main.tex");
        let cmd = compose_latexmk(&options, Duration::from_secs(60));
        assert!(cmd.argv.last().unwrap().ends_with("/main.tex"));
    }

    #[test]
    fn compiler_flag_is_included() {
        let mut options = base_options("main.tex");
        options.compiler = Compiler::Xelatex;
        let cmd = compose_latexmk(&options, Duration::from_secs(60));
        assert!(cmd.argv.contains(&"-xelatex".to_string()));
    }

    #[test]
    fn check_error_mode_sets_chktex_env() {
        let mut options = base_options("main.tex");
        options.check = Check::Error;
        let cmd = compose_latexmk(&options, Duration::from_secs(60));
        assert!(cmd.env.iter().any(|(k, _)| k == "CHKTEX_EXIT_ON_ERROR"));
    }

    #[test]
    fn normal_check_mode_sets_no_chktex_env() {
        let options = base_options("main.tex");
        let cmd = compose_latexmk(&options, Duration::from_secs(60));
        assert!(cmd.env.is_empty());
    }
}
