//! Ordered collection of named, weighted pass/fail probes.
//!
//! A check is anything implementing [`Check`]: file existence, a subprocess
//! exit code, a content pattern. The registry never lets one check's failure
//! affect another. Errors, panics and timeouts all become a failed
//! [`CheckResult`] carrying an [`Issue`], and the batch always completes.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::debug;

use crate::error::{FactoryError, Result};
use crate::model::{CheckMeta, CheckResult, Issue, IterationResult, Severity};

/// Default per-check timeout.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(60);

/// Immutable view handed to every check in an iteration.
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub build_path: PathBuf,
    pub pipeline: String,
    pub iteration: u32,
    pub previous: Option<Arc<IterationResult>>,
}

impl CheckContext {
    pub fn new(build_path: impl Into<PathBuf>, pipeline: impl Into<String>, iteration: u32) -> Self {
        Self {
            build_path: build_path.into(),
            pipeline: pipeline.into(),
            iteration,
            previous: None,
        }
    }

    pub fn with_previous(mut self, previous: Option<Arc<IterationResult>>) -> Self {
        self.previous = previous;
        self
    }
}

/// A named, weighted boolean probe against a build.
#[async_trait]
pub trait Check: Send + Sync {
    fn meta(&self) -> &CheckMeta;

    /// `Ok(true)` passes, `Ok(false)` fails, `Err` is a broken check.
    async fn verify(&self, ctx: &CheckContext) -> anyhow::Result<bool>;
}

type PredicateFn = dyn Fn(CheckContext) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync;

/// Check backed by a closure.
pub struct PredicateCheck {
    meta: CheckMeta,
    predicate: Box<PredicateFn>,
}

impl PredicateCheck {
    pub fn new<F, Fut>(meta: CheckMeta, predicate: F) -> Self
    where
        F: Fn(CheckContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        Self {
            meta,
            predicate: Box::new(move |ctx| predicate(ctx).boxed()),
        }
    }

    /// A check that always returns `outcome`.
    pub fn constant(meta: CheckMeta, outcome: bool) -> Self {
        Self::new(meta, move |_| async move { Ok::<bool, anyhow::Error>(outcome) })
    }
}

impl std::fmt::Debug for PredicateCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateCheck").field("meta", &self.meta).finish()
    }
}

#[async_trait]
impl Check for PredicateCheck {
    fn meta(&self) -> &CheckMeta {
        &self.meta
    }

    async fn verify(&self, ctx: &CheckContext) -> anyhow::Result<bool> {
        (self.predicate)(ctx.clone()).await
    }
}

/// Ordered, id-keyed set of checks.
#[derive(Clone)]
pub struct CheckRegistry {
    checks: Vec<Arc<dyn Check>>,
    index: HashMap<String, usize>,
    timeout: Duration,
    concurrent: bool,
}

impl Default for CheckRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CheckRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckRegistry")
            .field("checks", &self.ids())
            .field("timeout", &self.timeout)
            .field("concurrent", &self.concurrent)
            .finish()
    }
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            index: HashMap::new(),
            timeout: DEFAULT_CHECK_TIMEOUT,
            concurrent: false,
        }
    }

    /// Per-check timeout. `Duration::ZERO` disables it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run checks concurrently. Results keep registration order.
    pub fn with_concurrency(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    /// Register a check. Ids must be unique.
    pub fn register(&mut self, check: Arc<dyn Check>) -> Result<()> {
        let id = check.meta().id.clone();
        if self.index.contains_key(&id) {
            return Err(FactoryError::DuplicateCheck(id));
        }
        self.index.insert(id, self.checks.len());
        self.checks.push(check);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_check(mut self, check: impl Check + 'static) -> Result<Self> {
        self.register(Arc::new(check))?;
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Check>> {
        self.index.get(id).map(|&i| &self.checks[i])
    }

    pub fn ids(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.meta().id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Sum of all registered point weights.
    pub fn total_points(&self) -> u64 {
        self.checks.iter().map(|c| u64::from(c.meta().points)).sum()
    }

    /// Run every check once against `ctx`, one result per check in
    /// registration order.
    pub async fn run(&self, ctx: &CheckContext) -> Vec<CheckResult> {
        if self.concurrent {
            join_all(self.checks.iter().map(|c| run_check(c.as_ref(), ctx, self.timeout))).await
        } else {
            let mut results = Vec::with_capacity(self.checks.len());
            for check in &self.checks {
                results.push(run_check(check.as_ref(), ctx, self.timeout).await);
            }
            results
        }
    }
}

async fn run_check(check: &dyn Check, ctx: &CheckContext, timeout: Duration) -> CheckResult {
    let meta = check.meta();
    let start = Instant::now();

    let guarded = AssertUnwindSafe(check.verify(ctx)).catch_unwind();
    let outcome = if timeout.is_zero() {
        Ok(guarded.await)
    } else {
        tokio::time::timeout(timeout, guarded).await
    };

    let (passed, message, issues) = match outcome {
        Ok(Ok(Ok(true))) => (true, format!("{} passed", meta.name), Vec::new()),
        Ok(Ok(Ok(false))) => {
            let severity = if meta.mandatory {
                Severity::High
            } else {
                Severity::Medium
            };
            let mut issue = Issue::new(severity, &meta.category, format!("{} failed", meta.name));
            if !meta.description.is_empty() {
                issue = issue.with_fix(&meta.description);
            }
            (false, format!("{} failed", meta.name), vec![issue])
        }
        Ok(Ok(Err(e))) => {
            let message = format!("Check {} threw: {}", meta.id, e);
            let issue = Issue::new(Severity::Critical, &meta.category, &message);
            (false, message, vec![issue])
        }
        Ok(Err(panic)) => {
            let message = format!("Check {} panicked: {}", meta.id, panic_message(panic.as_ref()));
            let issue = Issue::new(Severity::Critical, &meta.category, &message);
            (false, message, vec![issue])
        }
        Err(_) => {
            let message = format!("Check {} timed out after {}s", meta.id, timeout.as_secs());
            let issue = Issue::new(Severity::High, &meta.category, &message);
            (false, message, vec![issue])
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    debug!(check = %meta.id, passed, duration_ms, "check finished");

    CheckResult {
        check_id: meta.id.clone(),
        name: meta.name.clone(),
        category: meta.category.clone(),
        mandatory: meta.mandatory,
        points: meta.points,
        passed,
        message,
        issues,
        duration_ms,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
