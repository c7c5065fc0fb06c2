// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project: the state machine owning one tenant's compile lifecycle (spec
//! §4.2). Single-flight compile, runner lease management with reuse and
//! forced refresh, and recovery on a dead instance all live here; the
//! Project Manager (`project_manager.rs`) only owns the registry around it.

use crate::metrics::Metrics;
use crate::output_cache::OutputCache;
use crate::pdf_cache::PdfCache;
use crate::pending::PendingOp;
use crate::resource_writer::ResourceWriter;
use clsi_core::build_id::BuildId;
use clsi_core::command::CommandOptions;
use clsi_core::compile::{Check, CompileOptions, CompileRequest, CompileResponse, CompileStatus, Timings};
use clsi_core::error::{ClsiError, Result};
use clsi_core::namespace::Namespace;
use clsi_core::output::OutputFile;
use clsi_drivers::synctex::{PdfPosition, RawCodePosition};
use clsi_drivers::wordcount::Words;
use clsi_runner::{CommandRunner, ContainerEvent, RunnerError};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

/// The command output's stdout/stderr scratch filenames, one pair per
/// command kind so concurrent SyncTeX/WordCount/compile calls on the same
/// namespace never clobber each other's capture file.
const COMPILE_STDOUT: (&str, &str) = ("output.stdout.tmp", "output.stderr.tmp");
const SYNCTEX_STDOUT: (&str, &str) = ("synctex.stdout.tmp", "synctex.stderr.tmp");
const WORDCOUNT_STDOUT: (&str, &str) = ("wordcount.stdout.tmp", "wordcount.stderr.tmp");

/// A resolved SyncTeX PDF→code position, with `input` translated from a
/// container-internal path to project-relative via `CommandRunner::resolve`
/// (spec §4.8 "SyncTeX from PDF").
#[derive(Debug, Clone, PartialEq)]
pub struct CodePosition {
    pub path: String,
    pub line: i64,
    pub column: i64,
}

/// The sub-managers a Project borrows from the Project Manager (spec §9):
/// shared, namespace-agnostic collaborators constructed once and handed to
/// every Project. A Project never holds a pointer back to the Manager
/// itself — ownership is strictly Manager → Project → sub-managers.
pub struct SubManagers {
    pub resource_writer: Arc<ResourceWriter>,
    pub output_cache: Arc<OutputCache>,
    pub pdf_cache: Arc<PdfCache>,
    pub runner: Arc<dyn CommandRunner>,
    pub metrics: Arc<Metrics>,
    /// The configured Docker image allow-list (spec §6 "Environment"
    /// `allowed_images`, §7 "disallowed ... image"). Checked against every
    /// incoming `image_name` before a container is ever created.
    pub allowed_images: HashSet<String>,
}

/// The runner lease state (spec §4.2.2): when it expires, how many setups
/// are in flight, and the lock serializing `Run` against a concurrent
/// teardown.
struct RunnerHandle {
    valid_until: Mutex<Instant>,
    setup_mux: tokio::sync::RwLock<()>,
    pending: PendingOp<(Instant, ContainerEvent), RunnerError>,
}

impl RunnerHandle {
    fn new() -> Self {
        Self {
            // Already-expired: the first `run()` call always performs setup.
            valid_until: Mutex::new(Instant::now()),
            setup_mux: tokio::sync::RwLock::new(()),
            pending: PendingOp::new(),
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= *self.valid_until.lock()
    }
}

pub struct Project {
    namespace: Namespace,
    subs: Arc<SubManagers>,
    dead: AtomicBool,
    has_content: AtomicBool,
    last_access: Mutex<Instant>,
    last_successful: Mutex<Option<(String, BuildId)>>,
    /// Coordination gate (spec §4.2 `stateMux`): held for reading during
    /// compile/sync/word-count, for writing during teardown.
    state_gate: tokio::sync::RwLock<()>,
    runner: RunnerHandle,
    compile_guard: Mutex<Option<CancellationToken>>,
}

impl Project {
    pub fn new(namespace: Namespace, subs: Arc<SubManagers>) -> Self {
        Self {
            namespace,
            subs,
            dead: AtomicBool::new(false),
            has_content: AtomicBool::new(false),
            last_access: Mutex::new(Instant::now()),
            last_successful: Mutex::new(None),
            state_gate: tokio::sync::RwLock::new(()),
            runner: RunnerHandle::new(),
            compile_guard: Mutex::new(None),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn has_content(&self) -> bool {
        self.has_content.load(Ordering::Acquire)
    }

    /// Stamp `lastAccess = now` (spec §4.1 "On every Get").
    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    fn last_access_at(&self) -> Instant {
        *self.last_access.lock()
    }

    fn ns(&self) -> &str {
        self.namespace.as_str()
    }

    fn compile_dir(&self) -> PathBuf {
        self.subs.resource_writer.namespace_dir(self.ns())
    }

    // ---------------------------------------------------------------
    // Compile (spec §4.2.1)
    // ---------------------------------------------------------------

    /// Runs one compile. Single-flight: a concurrent second call fails with
    /// `AlreadyCompiling` instead of queuing.
    pub async fn compile(&self, request: CompileRequest) -> Result<CompileResponse> {
        let cancel = CancellationToken::new();
        {
            let mut guard = self.compile_guard.lock();
            if guard.is_some() {
                return Err(ClsiError::AlreadyCompiling);
            }
            *guard = Some(cancel.clone());
        }
        let result = self.compile_guarded(request, cancel).await;
        *self.compile_guard.lock() = None;
        result
    }

    /// Cooperatively cancel an in-flight compile, if any (spec §9
    /// "Cancellation fan-out").
    fn cancel_in_flight(&self) {
        if let Some(token) = self.compile_guard.lock().as_ref() {
            token.cancel();
        }
    }

    async fn compile_guarded(&self, request: CompileRequest, cancel: CancellationToken) -> Result<CompileResponse> {
        let span = info_span!("compile", namespace = %self.namespace, build_id = tracing::field::Empty);
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ClsiError::Cancelled),
            result = self.run_compile(request).instrument(span) => result,
        }
    }

    async fn run_compile(&self, mut request: CompileRequest) -> Result<CompileResponse> {
        let _gate = self.state_gate.read().await;
        if self.is_dead() {
            return Err(ClsiError::Dead);
        }
        self.check_image_allowed(&request.options.image_name)?;
        self.subs.metrics.record_compile_started();
        let overall_start = Instant::now();
        let mut timings = Timings::default();

        apply_draft(&mut request);
        apply_root_doc_alias(&mut request);
        let resource_paths: HashSet<String> = request.resources.iter().map(|r| r.path.clone()).collect();
        let options_hash = compile_options_hash(&request.options);

        if let Some(response) = self.try_short_circuit(&request, &options_hash, &mut timings).await? {
            self.subs.metrics.record_compile_finished(response.status);
            return Ok(response);
        }

        let sync_start = Instant::now();
        self.subs
            .resource_writer
            .sync_resources_to_disk(self.ns(), &request.resources, &request.options.sync_state, request.options.sync_type)
            .await?;
        timings.sync = Some(sync_start.elapsed());
        self.has_content.store(true, Ordering::Release);

        let build = BuildId::generate();
        tracing::Span::current().record("build_id", tracing::field::display(build));

        let timeout = request.options.timeout;
        let command = clsi_drivers::latex::compose_latexmk(&request.options, timeout)
            .with_output_files(COMPILE_STDOUT.0, COMPILE_STDOUT.1);

        let compile_start = Instant::now();
        let run_outcome = self.run(command, &request.options.image_name).await;
        timings.compile = Some(compile_start.elapsed());

        let (status, error_detail) = match &run_outcome {
            Ok(result) => {
                let ok = result.exit_code == 0;
                let status = match (request.options.check, ok) {
                    (Check::Normal, true) => CompileStatus::Success,
                    (Check::Normal, false) => CompileStatus::Failure,
                    (_, true) => CompileStatus::ValidationPass,
                    (_, false) => CompileStatus::ValidationFail,
                };
                (status, result.error_message.clone())
            }
            Err(RunnerError::DeadlineExceeded) => (CompileStatus::Timedout, None),
            Err(RunnerError::Cancelled) => (CompileStatus::Terminated, None),
            Err(other) => return Err(other.clone().into()),
        };

        let output_start = Instant::now();
        let save = self
            .subs
            .output_cache
            .save_output_files(&self.namespace, &self.compile_dir(), build, &resource_paths)
            .await?;
        timings.output = Some(output_start.elapsed());

        let mut status = status;
        if status == CompileStatus::Success && !save.has_output_pdf {
            warn!(namespace = %self.namespace, %build, "compile reported success but no output.pdf was produced");
            status = CompileStatus::Failure;
        }

        if status == CompileStatus::Success {
            if let Some(pdf_path) = &save.output_pdf_path {
                let pdf_start = Instant::now();
                match self.subs.pdf_cache.offer(self.ns(), pdf_path).await {
                    Ok(_) => timings.pdf_caching = Some(pdf_start.elapsed()),
                    Err(e) => warn!(namespace = %self.namespace, error = %e, "pdf caching offer failed"),
                }
            }
            *self.last_successful.lock() = Some((options_hash, build));
        } else {
            *self.last_successful.lock() = None;
        }

        timings.compile_e2e = Some(overall_start.elapsed());
        self.subs.metrics.record_compile_finished(status);
        info!(namespace = %self.namespace, %build, ?status, "compile finished");

        let response = match status {
            CompileStatus::Success => CompileResponse::success(save.output_files, timings),
            CompileStatus::ValidationPass => CompileResponse { status, error: None, output_files: save.output_files, timings },
            _ => {
                let message = error_detail.unwrap_or_else(|| format!("{status:?}"));
                CompileResponse { status, error: Some(message), output_files: save.output_files, timings }
            }
        };
        Ok(response)
    }

    /// Step 3 of §4.2.1: if the previous compile succeeded with the
    /// identical options hash and the on-disk resources are still in sync,
    /// short-circuit by replaying the prior build's output listing.
    async fn try_short_circuit(
        &self,
        request: &CompileRequest,
        options_hash: &str,
        timings: &mut Timings,
    ) -> Result<Option<CompileResponse>> {
        let prior = self.last_successful.lock().clone();
        let Some((hash, build)) = prior else { return Ok(None) };
        if hash != options_hash {
            *self.last_successful.lock() = None;
            return Ok(None);
        }
        if !self.subs.resource_writer.resources_in_sync(self.ns(), &request.resources)? {
            *self.last_successful.lock() = None;
            return Ok(None);
        }
        let output_files: Vec<OutputFile> = self.subs.output_cache.list_output_files(&self.namespace, build).await?;
        timings.compile_e2e = Some(Duration::ZERO);
        info!(namespace = %self.namespace, %build, "compile short-circuited: resources unchanged since last build");
        Ok(Some(CompileResponse::success(output_files, timings.clone())))
    }

    // ---------------------------------------------------------------
    // Runner lease (spec §4.2.2)
    // ---------------------------------------------------------------

    /// Execute one command through the Command Runner, handling setup reuse,
    /// forced refresh on retry, and the at-most-three-attempt retry loop.
    pub async fn run(&self, options: CommandOptions, image_name: &str) -> std::result::Result<clsi_core::command::CommandResult, RunnerError> {
        let timeout = options.timeout;
        let overall_deadline = Instant::now() + timeout;
        let mut last_err = RunnerError::DeadlineExceeded;

        for attempt in 0u32..3 {
            let remaining = overall_deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || remaining < timeout / 2 {
                return Err(last_err);
            }

            let needs_setup = attempt > 0 || self.runner.expired();
            if needs_setup {
                if let Err(e) = self.ensure_setup(image_name).await {
                    let bail = matches!(e, RunnerError::Cancelled | RunnerError::DeadlineExceeded);
                    last_err = e;
                    if bail {
                        return Err(last_err);
                    }
                    continue;
                }
            }

            let guard = self.runner.setup_mux.read().await;
            if overall_deadline > *self.runner.valid_until.lock() {
                drop(guard);
                last_err = RunnerError::LeaseExpired;
                continue;
            }

            let attempt_timeout = remaining.min(timeout);
            let outcome = tokio::time::timeout(attempt_timeout, self.subs.runner.run(self.ns(), &options)).await;
            drop(guard);

            match outcome {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => {
                    let bail = matches!(e, RunnerError::Cancelled | RunnerError::DeadlineExceeded);
                    last_err = e;
                    if bail {
                        return Err(last_err);
                    }
                }
                Err(_elapsed) => return Err(RunnerError::DeadlineExceeded),
            }
        }
        Err(last_err)
    }

    /// Single-flight setup (spec §4.2.2): followers join a pending setup
    /// instead of duplicating it.
    async fn ensure_setup(&self, image_name: &str) -> std::result::Result<(), RunnerError> {
        let ns = self.ns().to_string();
        let image_name = image_name.to_string();
        let runner = Arc::clone(&self.subs.runner);
        let (valid_until, container_event) = self
            .runner
            .pending
            .join_or_run(|| async move {
                let lease = runner.setup(&ns, &image_name).await?;
                Ok((lease.valid_until, lease.container_event))
            })
            .await?;
        *self.runner.valid_until.lock() = valid_until;
        match container_event {
            ContainerEvent::Created => self.subs.metrics.record_container_created(),
            ContainerEvent::Restarted => self.subs.metrics.record_container_restarted(),
            ContainerEvent::Unchanged => {}
        }
        Ok(())
    }

    /// `StartInBackground` (spec §4.2.4): fire-and-forget setup refresh when
    /// the lease is within a minute of expiring.
    pub fn start_in_background(self: &Arc<Self>, image_name: String) {
        let remaining = self.runner.valid_until.lock().saturating_duration_since(Instant::now());
        if remaining > Duration::from_secs(60) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::time::timeout(Duration::from_secs(10), this.ensure_setup(&image_name)).await.is_err() {
                warn!(namespace = %this.namespace, "background runner setup timed out");
            }
        });
    }

    // ---------------------------------------------------------------
    // SyncTeX / WordCount (spec §4.2.4)
    // ---------------------------------------------------------------

    pub async fn synctex_code_to_pdf(
        &self,
        line: u32,
        column: i32,
        path: &str,
        output_pdf: &str,
        image_name: &str,
        timeout: Duration,
    ) -> Result<Vec<PdfPosition>> {
        let _gate = self.state_gate.read().await;
        if self.is_dead() {
            return Err(ClsiError::Dead);
        }
        self.check_image_allowed(image_name)?;
        self.require_synctex_output(output_pdf).await?;

        let argv = clsi_drivers::synctex::synctex_code_command(line, column, path, output_pdf);
        let options =
            CommandOptions::new(argv, image_name, timeout).with_output_files(SYNCTEX_STDOUT.0, SYNCTEX_STDOUT.1);
        self.run(options, image_name).await.map_err(ClsiError::from)?;

        let stdout = self.read_compile_file(SYNCTEX_STDOUT.0).await.unwrap_or_default();
        Ok(clsi_drivers::synctex::parse_code_to_pdf(&stdout))
    }

    pub async fn synctex_pdf_to_code(
        &self,
        page: u32,
        h: f64,
        v: f64,
        output_pdf: &str,
        image_name: &str,
        timeout: Duration,
    ) -> Result<Vec<CodePosition>> {
        let _gate = self.state_gate.read().await;
        if self.is_dead() {
            return Err(ClsiError::Dead);
        }
        self.check_image_allowed(image_name)?;
        self.require_synctex_output(output_pdf).await?;

        let argv = clsi_drivers::synctex::synctex_pdf_command(page, h, v, output_pdf);
        let options =
            CommandOptions::new(argv, image_name, timeout).with_output_files(SYNCTEX_STDOUT.0, SYNCTEX_STDOUT.1);
        self.run(options, image_name).await.map_err(ClsiError::from)?;

        let stdout = self.read_compile_file(SYNCTEX_STDOUT.0).await.unwrap_or_default();
        let raw: Vec<RawCodePosition> = clsi_drivers::synctex::parse_pdf_to_code(&stdout);
        Ok(raw.into_iter().map(|r| self.resolve_code_position(r)).collect())
    }

    fn resolve_code_position(&self, raw: RawCodePosition) -> CodePosition {
        let resolved = self.subs.runner.resolve(self.ns(), &raw.input);
        let compile_dir = self.compile_dir();
        let path = resolved
            .strip_prefix(&compile_dir)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| resolved.to_string_lossy().to_string());
        CodePosition { path, line: raw.line, column: raw.column }
    }

    /// Reject an `image_name` outside the configured allow-list before any
    /// container is created (spec §6 `allowed_images`, §7 "disallowed ...
    /// image").
    fn check_image_allowed(&self, image_name: &str) -> Result<()> {
        if self.subs.allowed_images.contains(image_name) {
            Ok(())
        } else {
            Err(ClsiError::Validation(format!("image not in allow-list: {image_name}")))
        }
    }

    async fn require_synctex_output(&self, output_pdf: &str) -> Result<()> {
        let stem = output_pdf.strip_suffix(".pdf").unwrap_or(output_pdf);
        let synctex_name = format!("{stem}.synctex.gz");
        let synctex_path = self.compile_dir().join(&synctex_name);
        if !tokio::fs::try_exists(&synctex_path).await.unwrap_or(false) {
            return Err(ClsiError::MissingOutputFile(synctex_name));
        }
        Ok(())
    }

    pub async fn word_count(&self, main: &str, image_name: &str, timeout: Duration) -> Result<Words> {
        let _gate = self.state_gate.read().await;
        if self.is_dead() {
            return Err(ClsiError::Dead);
        }
        self.check_image_allowed(image_name)?;
        if !self.has_content() {
            return Err(ClsiError::InvalidState { message: "project has no content to word count".into(), recoverable: false });
        }

        let argv = clsi_drivers::wordcount::wordcount_command(main);
        let options =
            CommandOptions::new(argv, image_name, timeout).with_output_files(WORDCOUNT_STDOUT.0, WORDCOUNT_STDOUT.1);
        self.run(options, image_name).await.map_err(ClsiError::from)?;

        let stderr = self.read_compile_file(WORDCOUNT_STDOUT.1).await.unwrap_or_default();
        Ok(clsi_drivers::wordcount::parse_word_count(&stderr))
    }

    async fn read_compile_file(&self, name: &str) -> Option<String> {
        tokio::fs::read_to_string(self.compile_dir().join(name)).await.ok()
    }

    // ---------------------------------------------------------------
    // Cleanup / ClearCache / StopExpiredRunner (spec §4.2.3)
    // ---------------------------------------------------------------

    /// Marks the Project dead and tears down all on-disk/container state.
    /// A dead Project is replaced by the Manager on the next request.
    pub async fn cleanup(&self) -> Result<()> {
        self.cancel_in_flight();
        let _gate = self.state_gate.write().await;
        self.dead.store(true, Ordering::Release);
        self.reset_remembered_state();
        self.teardown().await
    }

    /// Tears down the same state as `cleanup` but recreates an empty working
    /// directory and leaves the Project alive. Marks it dead if recreation
    /// fails.
    pub async fn clear_cache(&self) -> Result<()> {
        self.cancel_in_flight();
        let _gate = self.state_gate.write().await;
        self.reset_remembered_state();
        self.teardown().await?;

        match tokio::fs::create_dir_all(self.compile_dir()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.dead.store(true, Ordering::Release);
                Err(ClsiError::Transport(e.to_string()))
            }
        }
    }

    fn reset_remembered_state(&self) {
        self.has_content.store(false, Ordering::Release);
        *self.last_successful.lock() = None;
    }

    async fn teardown(&self) -> Result<()> {
        self.subs.runner.stop(self.ns()).await?;
        self.subs.metrics.record_container_removed();
        self.subs.resource_writer.clear(self.ns()).await?;
        self.subs.output_cache.clear(self.ns()).await?;
        self.subs.pdf_cache.clear(self.ns()).await?;
        Ok(())
    }

    /// Stops only the container when the lease is older than `threshold`;
    /// does not mark the project dead and does not clear content.
    pub async fn stop_expired_runner(&self, threshold: Instant) -> Result<()> {
        if *self.runner.valid_until.lock() >= threshold {
            return Ok(());
        }
        let _guard = self.runner.setup_mux.write().await;
        if *self.runner.valid_until.lock() >= threshold {
            return Ok(());
        }
        self.subs.runner.stop(self.ns()).await?;
        self.subs.metrics.record_container_removed();
        *self.runner.valid_until.lock() = Instant::now();
        Ok(())
    }

    /// Cleanup this project only if it has been idle since before
    /// `threshold` (spec §2 "cleanup loops over idle ... projects").
    pub async fn cleanup_unless_healthy(&self, threshold: Instant) -> Result<()> {
        if self.last_access_at() >= threshold {
            return Ok(());
        }
        self.cleanup().await
    }
}

/// Step 1 of §4.2.1: inject the `draft` class option into the root doc.
/// Idempotent; a no-op when the root resource isn't an inline doc.
fn apply_draft(request: &mut CompileRequest) {
    if !request.options.draft {
        return;
    }
    let root_path = request.options.root_resource_path.clone();
    if let Some(root) = request.resources.iter_mut().find(|r| r.path == root_path) {
        if let clsi_core::resource::ResourceKind::Doc { content, .. } = &mut root.kind {
            *content = clsi_drivers::draft::inject_draft(content);
        }
    }
}

/// Step 2 of §4.2.1: clone the root doc into `output.tex` when it requests
/// TikZ/PSTricks externalization and no such resource exists yet.
fn apply_root_doc_alias(request: &mut CompileRequest) {
    let root_path = request.options.root_resource_path.clone();
    let Some(root) = request.resources.iter().find(|r| r.path == root_path) else { return };
    let Some((content, version)) = root.as_doc() else { return };
    if let Some(alias) = clsi_drivers::root_doc_alias::alias_for(content, version, &request.resources) {
        request.resources.push(alias);
    }
}

/// Hash of the options that determine a build's content, independent of the
/// resources themselves — used for the compile short-circuit (spec §4.2.1
/// step 3, §9 open question).
fn compile_options_hash(options: &CompileOptions) -> String {
    let raw = format!(
        "{:?}|{:?}|{}|{}|{}|{}",
        options.compiler,
        options.check,
        options.draft,
        options.image_name,
        options.root_resource_path,
        options.timeout.as_millis(),
    );
    hex::encode(Sha256::digest(raw.as_bytes()))
}
