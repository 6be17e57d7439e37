//! Batch copy / move / remove over the runs of a project.
//!
//! Every operation is validated up front (URI syntax, template placeholders,
//! the removal safety gate, explicit run names). Runs are then dispatched as
//! blocking tasks to a pool bounded by a semaphore; all work inside one run is
//! sequential. Results are collected by the orchestrator alone as tasks
//! complete.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use cryocat_core::{parse_pattern, resolve_targets, EntityId, EntityKind, TargetTemplate, UriPattern};
use cryocat_store::{find_matches, Entity, Presence, Root, Run, StoreError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::BatchError;
use crate::report::{BatchReport, RunEntry, RunResult};
use crate::settings::DEFAULT_WORKERS;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Arguments of a copy or move.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub kind: EntityKind,
    /// Source URI: literal, glob or `re:` pattern.
    pub source: String,
    /// Target URI template, e.g. `ribosome:backup/{session_id}`.
    pub target: String,
    /// Explicit runs; `None` (or empty) means every run of the project.
    pub runs: Option<Vec<String>>,
    pub overwrite: bool,
    pub workers: usize,
}

impl TransferRequest {
    pub fn new(kind: EntityKind, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            target: target.into(),
            runs: None,
            overwrite: false,
            workers: DEFAULT_WORKERS,
        }
    }

    pub fn runs<I, S>(mut self, runs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runs = Some(runs.into_iter().map(Into::into).collect());
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

/// Arguments of a remove.
#[derive(Debug, Clone)]
pub struct RemoveRequest {
    pub kind: EntityKind,
    pub pattern: String,
    pub runs: Option<Vec<String>>,
    pub dry_run: bool,
    /// Allow glob/regex patterns to delete.
    pub force: bool,
    pub workers: usize,
}

impl RemoveRequest {
    pub fn new(kind: EntityKind, pattern: impl Into<String>) -> Self {
        Self {
            kind,
            pattern: pattern.into(),
            runs: None,
            dry_run: false,
            force: false,
            workers: DEFAULT_WORKERS,
        }
    }

    pub fn runs<I, S>(mut self, runs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runs = Some(runs.into_iter().map(Into::into).collect());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

// ---------------------------------------------------------------------------
// Per-object move state
// ---------------------------------------------------------------------------

/// Progress of a single moved object. The state an object ends in is logged;
/// `Copied` as a final state means the target was written but the source
/// could not be deleted, so the object now exists twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveState {
    Matched,
    CopyPending,
    Copied,
    SourceDeletePending,
    Done,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Operation {
    Copy {
        template: TargetTemplate,
        overwrite: bool,
    },
    Move {
        template: TargetTemplate,
        overwrite: bool,
    },
    Remove {
        dry_run: bool,
    },
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Self::Copy { .. } => "copy",
            Self::Move { .. } => "move",
            Self::Remove { .. } => "remove",
        }
    }
}

/// Everything a run task needs, validated before dispatch.
#[derive(Debug)]
struct Plan {
    pattern: UriPattern,
    operation: Operation,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs batch operations against one project.
#[derive(Debug, Clone)]
pub struct BatchEngine {
    root: Root,
}

impl BatchEngine {
    pub fn new(root: Root) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    /// Copy every match of `source` to its rendered target. Sources are
    /// left untouched.
    pub async fn copy(&self, request: TransferRequest) -> Result<BatchReport, BatchError> {
        let (pattern, template) = parse_transfer(&request)?;
        let plan = Plan {
            pattern,
            operation: Operation::Copy {
                template,
                overwrite: request.overwrite,
            },
        };
        self.execute(plan, request.runs.as_deref(), request.workers)
            .await
    }

    /// Copy, then delete each source whose copy succeeded.
    pub async fn move_entities(&self, request: TransferRequest) -> Result<BatchReport, BatchError> {
        let (pattern, template) = parse_transfer(&request)?;
        let plan = Plan {
            pattern,
            operation: Operation::Move {
                template,
                overwrite: request.overwrite,
            },
        };
        self.execute(plan, request.runs.as_deref(), request.workers)
            .await
    }

    /// Delete every match. Glob and regex patterns need `force` or
    /// `dry_run`, otherwise nothing is touched.
    pub async fn remove(&self, request: RemoveRequest) -> Result<BatchReport, BatchError> {
        let pattern = parse_pattern(request.kind, &request.pattern).map_err(BatchError::InvalidUri)?;
        if pattern.is_pattern() && !request.force && !request.dry_run {
            tracing::warn!(pattern = %pattern, "Refusing pattern removal without force or dry-run");
            return Err(BatchError::SafetyGate {
                pattern: request.pattern.clone(),
            });
        }
        let plan = Plan {
            pattern,
            operation: Operation::Remove {
                dry_run: request.dry_run,
            },
        };
        self.execute(plan, request.runs.as_deref(), request.workers)
            .await
    }

    /// Every run of the project, or the named ones (deduplicated, in order).
    fn select_runs(&self, names: Option<&[String]>) -> Result<Vec<Run>, BatchError> {
        let names = match names {
            Some(names) if !names.is_empty() => names,
            _ => return Ok(self.root.runs()?),
        };

        let mut seen = BTreeSet::new();
        let mut runs = Vec::new();
        let mut unknown = Vec::new();
        for name in names {
            if !seen.insert(name.as_str()) {
                continue;
            }
            match self.root.run(name) {
                Ok(run) => runs.push(run),
                Err(StoreError::NotFound(_)) => unknown.push(name.clone()),
                Err(StoreError::Core(_)) => unknown.push(name.clone()),
                Err(err) => return Err(err.into()),
            }
        }

        if !unknown.is_empty() {
            return Err(BatchError::UnknownRun(unknown));
        }
        Ok(runs)
    }

    async fn execute(
        &self,
        plan: Plan,
        run_names: Option<&[String]>,
        workers: usize,
    ) -> Result<BatchReport, BatchError> {
        // Run discovery does blocking layer I/O.
        let engine = self.clone();
        let names = run_names.map(<[String]>::to_vec);
        let runs = tokio::task::spawn_blocking(move || engine.select_runs(names.as_deref()))
            .await
            .map_err(|e| BatchError::Worker(e.to_string()))??;
        let workers = workers.max(1);
        tracing::info!(
            operation = plan.operation.name(),
            kind = %plan.pattern.kind(),
            pattern = %plan.pattern,
            runs = runs.len(),
            workers,
            "Starting batch",
        );

        let plan = Arc::new(plan);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        let mut task_runs = HashMap::with_capacity(runs.len());

        for run in runs {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| BatchError::Worker(e.to_string()))?;
            let plan = Arc::clone(&plan);
            let name = run.name().to_string();
            let handle = tasks.spawn_blocking(move || {
                let _permit = permit;
                execute_run(&run, &plan)
            });
            task_runs.insert(handle.id(), name);
        }

        let mut report = BatchReport::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, result)) => {
                    if let Some(name) = task_runs.remove(&id) {
                        report.runs.insert(name, result);
                    }
                }
                Err(err) => {
                    let name = task_runs
                        .remove(&err.id())
                        .unwrap_or_else(|| "<unknown>".to_string());
                    tracing::error!(run = %name, error = %err, "Run task failed");
                    report
                        .runs
                        .insert(name, RunResult::failed(format!("Run task failed: {err}")));
                }
            }
        }

        tracing::info!(
            operation = plan.operation.name(),
            successes = report.successes(),
            errors = report.error_count(),
            "Batch finished",
        );
        Ok(report)
    }
}

fn parse_transfer(request: &TransferRequest) -> Result<(UriPattern, TargetTemplate), BatchError> {
    let pattern = parse_pattern(request.kind, &request.source).map_err(BatchError::InvalidUri)?;
    let template = TargetTemplate::parse(request.kind, &request.target).map_err(BatchError::InvalidUri)?;
    Ok((pattern, template))
}

// ---------------------------------------------------------------------------
// Run task
// ---------------------------------------------------------------------------

fn execute_run(run: &Run, plan: &Plan) -> RunResult {
    let mut result = RunResult::default();

    let matches = match find_matches(run, &plan.pattern) {
        Ok(matches) => matches,
        Err(err) => {
            tracing::error!(run = %run.name(), error = %err, "Matching failed");
            result.error(format!("Matching failed: {err}"));
            return result;
        }
    };

    match &plan.operation {
        Operation::Remove { dry_run } => remove_matches(run, &plan.pattern, &matches, *dry_run, &mut result),
        Operation::Copy {
            template,
            overwrite,
        } => transfer_matches(run, &matches, template, *overwrite, false, &mut result),
        Operation::Move {
            template,
            overwrite,
        } => transfer_matches(run, &matches, template, *overwrite, true, &mut result),
    }

    tracing::debug!(
        run = %run.name(),
        count = result.count,
        errors = result.errors.len(),
        "Run finished",
    );
    result
}

fn remove_matches(
    run: &Run,
    pattern: &UriPattern,
    matches: &[Entity],
    dry_run: bool,
    result: &mut RunResult,
) {
    if matches.is_empty() && !pattern.is_pattern() {
        result.error(
            StoreError::NotFound(format!("{} '{pattern}' in run '{}'", pattern.kind(), run.name()))
                .to_string(),
        );
        return;
    }

    for entity in matches {
        let object = entity.id.canonical();
        if dry_run {
            result.record(RunEntry::WouldRemove { object });
            continue;
        }
        match run.delete(&entity.id) {
            Ok(presence) => {
                if presence == Presence::Both {
                    tracing::warn!(run = %run.name(), object = %object, "Static instance is visible again after removal");
                }
                result.record(RunEntry::Removed { object });
            }
            Err(err) => result.error(format!("{object}: {err}")),
        }
    }
}

fn transfer_matches(
    run: &Run,
    matches: &[Entity],
    template: &TargetTemplate,
    overwrite: bool,
    is_move: bool,
    result: &mut RunResult,
) {
    let sources: Vec<EntityId> = matches.iter().map(|e| e.id.clone()).collect();
    let assignments = match resolve_targets(&sources, template) {
        Ok(assignments) => assignments,
        Err(err) => {
            // Nothing in this run is mutated.
            for source in &sources {
                result.error(format!("{source}: {err}"));
            }
            return;
        }
    };

    for (entity, assignment) in matches.iter().zip(assignments) {
        let source = &entity.id;
        let target = match assignment.target {
            Ok(target) => target,
            Err(err) => {
                result.error(format!("{source}: {err}"));
                continue;
            }
        };
        if &target == source {
            result.error(format!(
                "{source}: {}",
                StoreError::Conflict("source and target are identical".to_string())
            ));
            continue;
        }

        let outcome = if is_move {
            move_one(run, entity, &target, overwrite)
        } else {
            copy_one(run, source, &target, overwrite).map_err(|err| err.to_string())
        };
        match outcome {
            Ok(()) => result.record(RunEntry::Mapped {
                source: source.canonical(),
                target: target.canonical(),
            }),
            Err(message) => result.error(format!("{source} -> {target}: {message}")),
        }
    }
}

fn copy_one(run: &Run, source: &EntityId, target: &EntityId, overwrite: bool) -> Result<(), StoreError> {
    let payload = run.load(source)?;
    run.store(target, &payload, overwrite)
}

fn move_one(run: &Run, entity: &Entity, target: &EntityId, overwrite: bool) -> Result<(), String> {
    let source = &entity.id;
    let mut state = MoveState::Matched;

    if !entity.presence.is_mutable() {
        log_move(run, source, target, state);
        return Err(StoreError::ReadOnly(format!(
            "{} '{source}' in run '{}' exists only in the static layer",
            source.kind(),
            run.name()
        ))
        .to_string());
    }

    state = next_move_state(state);
    if let Err(err) = copy_one(run, source, target, overwrite) {
        log_move(run, source, target, state);
        return Err(err.to_string());
    }
    state = next_move_state(state);
    let copied = state;

    state = next_move_state(state);
    match run.delete(source) {
        Ok(presence) => {
            if presence == Presence::Both {
                tracing::warn!(run = %run.name(), source = %source, "Static instance is visible again after move");
            }
            state = next_move_state(state);
            log_move(run, source, target, state);
            Ok(())
        }
        Err(err) => {
            log_move(run, source, target, copied);
            Err(format!("copied, but source could not be deleted: {err}"))
        }
    }
}

fn next_move_state(state: MoveState) -> MoveState {
    match state {
        MoveState::Matched => MoveState::CopyPending,
        MoveState::CopyPending => MoveState::Copied,
        MoveState::Copied => MoveState::SourceDeletePending,
        MoveState::SourceDeletePending | MoveState::Done => MoveState::Done,
    }
}

fn log_move(run: &Run, source: &EntityId, target: &EntityId, state: MoveState) {
    match state {
        MoveState::Done => {
            tracing::debug!(run = %run.name(), source = %source, target = %target, state = ?state, "Move finished");
        }
        _ => {
            tracing::warn!(run = %run.name(), source = %source, target = %target, state = ?state, "Move stopped");
        }
    }
}
