// src/validation/mod.rs

//! Ordered rule pipelines with an aggregating error
//!
//! A [`ValidationPipeline`] runs its rules strictly in insertion order,
//! feeding each rule's output into the next. Rules report problems into a
//! shared [`ValidationError`] and either keep going or abort. A rule may
//! also answer [`RuleOutcome::Satisfied`], which stops the pipeline and tells
//! the caller the input needs no further processing (for instance a library
//! that is already installed at an equal or newer patch level).

pub mod rules;

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

/// Default status code of an aggregate validation failure
pub const DEFAULT_STATUS: u16 = 422;

/// A single reported problem: a message code plus its parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationEntry {
    pub code: String,
    pub params: BTreeMap<String, String>,
}

impl fmt::Display for ValidationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, " ({})", params.join(", "))?;
        }
        Ok(())
    }
}

/// Collector of validation problems, shared by all rules of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub status: u16,
    pub entries: Vec<ValidationEntry>,
}

impl Default for ValidationError {
    fn default() -> Self {
        Self {
            status: DEFAULT_STATUS,
            entries: Vec::new(),
        }
    }
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a problem and keep going
    pub fn add_error<I, K, V>(&mut self, code: impl Into<String>, params: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.entries.push(ValidationEntry {
            code: code.into(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.code.as_str())
    }

    /// Turn the collected problems into a failure, leaving this collector
    /// empty
    pub fn abort(&mut self) -> Error {
        Error::Validation(std::mem::take(self))
    }

    /// Record one last problem and fail
    pub fn abort_with<I, K, V>(&mut self, code: impl Into<String>, params: I) -> Error
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.add_error(code, params);
        self.abort()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self.entries.iter().map(ToString::to_string).collect();
        write!(f, "[{}] {}", self.status, entries.join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// What a rule hands back to the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome<T> {
    /// Pass (possibly transformed) data on to the next rule
    Continue(T),
    /// Nothing further to do for this input; stop the pipeline
    Satisfied,
}

/// What a pipeline run produced
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome<T> {
    /// Every rule ran; this is the final data
    Completed(T),
    /// A rule reported that no further processing is needed
    Satisfied,
}

impl<T> PipelineOutcome<T> {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PipelineOutcome::Satisfied)
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            PipelineOutcome::Completed(data) => Some(data),
            PipelineOutcome::Satisfied => None,
        }
    }
}

/// One step of a pipeline
#[async_trait]
pub trait Rule<T, C>: Send + Sync
where
    T: Send + 'static,
    C: Sync + 'static,
{
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn apply(
        &self,
        data: T,
        context: &C,
        errors: &mut ValidationError,
    ) -> Result<RuleOutcome<T>>;
}

/// Adapter turning a synchronous closure into a [`Rule`]
pub struct FnRule<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<T, C, F> Rule<T, C> for FnRule<F>
where
    T: Send + 'static,
    C: Sync + 'static,
    F: Fn(T, &C, &mut ValidationError) -> Result<RuleOutcome<T>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(
        &self,
        data: T,
        context: &C,
        errors: &mut ValidationError,
    ) -> Result<RuleOutcome<T>> {
        (self.f)(data, context, errors)
    }
}

/// Fails the run if any earlier rule recorded a problem
#[derive(Debug, Default, Clone, Copy)]
pub struct ThrowIfErrors;

#[async_trait]
impl<T, C> Rule<T, C> for ThrowIfErrors
where
    T: Send + 'static,
    C: Sync + 'static,
{
    fn name(&self) -> &str {
        "throw-if-errors"
    }

    async fn apply(
        &self,
        data: T,
        _context: &C,
        errors: &mut ValidationError,
    ) -> Result<RuleOutcome<T>> {
        if errors.is_empty() {
            Ok(RuleOutcome::Continue(data))
        } else {
            Err(errors.abort())
        }
    }
}

/// An ordered chain of rules
pub struct ValidationPipeline<T, C>
where
    T: Send + 'static,
    C: Sync + 'static,
{
    rules: Vec<Box<dyn Rule<T, C>>>,
}

impl<T, C> Default for ValidationPipeline<T, C>
where
    T: Send + 'static,
    C: Sync + 'static,
{
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<T, C> fmt::Debug for ValidationPipeline<T, C>
where
    T: Send + 'static,
    C: Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.rules.iter().map(|r| r.name()).collect();
        f.debug_struct("ValidationPipeline")
            .field("rules", &names)
            .finish()
    }
}

impl<T, C> ValidationPipeline<T, C>
where
    T: Send + 'static,
    C: Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule
    pub fn add_rule(mut self, rule: impl Rule<T, C> + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Append a rule only if `condition` holds
    pub fn add_rule_when(self, condition: bool, rule: impl Rule<T, C> + 'static) -> Self {
        if condition { self.add_rule(rule) } else { self }
    }

    /// Append a synchronous closure as a rule
    pub fn add_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(T, &C, &mut ValidationError) -> Result<RuleOutcome<T>> + Send + Sync + 'static,
    {
        self.add_rule(FnRule {
            name: name.into(),
            f,
        })
    }

    /// Append the terminal [`ThrowIfErrors`] rule
    pub fn throw_if_errors(self) -> Self {
        self.add_rule(ThrowIfErrors)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every rule in order against `data`
    ///
    /// Problems recorded without a terminal [`ThrowIfErrors`] rule are
    /// dropped; place one where the chain should fail.
    pub async fn run(&self, data: T, context: &C) -> Result<PipelineOutcome<T>> {
        let mut errors = ValidationError::new();
        self.run_with(data, context, &mut errors).await
    }

    /// Run every rule in order, collecting problems into `errors`
    pub async fn run_with(
        &self,
        mut data: T,
        context: &C,
        errors: &mut ValidationError,
    ) -> Result<PipelineOutcome<T>> {
        for rule in &self.rules {
            tracing::trace!("Applying rule {}", rule.name());
            match rule.apply(data, context, errors).await? {
                RuleOutcome::Continue(next) => data = next,
                RuleOutcome::Satisfied => {
                    tracing::debug!("Rule {} reported input already satisfied", rule.name());
                    return Ok(PipelineOutcome::Satisfied);
                }
            }
        }
        Ok(PipelineOutcome::Completed(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Pipeline = ValidationPipeline<Vec<i32>, ()>;

    #[tokio::test]
    async fn test_rules_run_in_order_and_feed_forward() {
        let pipeline = Pipeline::new()
            .add_fn("push-1", |mut v, _, _| {
                v.push(1);
                Ok(RuleOutcome::Continue(v))
            })
            .add_fn("double", |v, _, _| {
                Ok(RuleOutcome::Continue(v.into_iter().map(|x| x * 2).collect()))
            })
            .add_fn("push-3", |mut v, _, _| {
                v.push(3);
                Ok(RuleOutcome::Continue(v))
            });

        let outcome = pipeline.run(vec![5], &()).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed(vec![10, 2, 3]));
    }

    #[tokio::test]
    async fn test_satisfied_stops_pipeline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let pipeline = Pipeline::new()
            .add_fn("skip", |_, _, _| Ok(RuleOutcome::Satisfied))
            .add_fn("never", move |v, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(RuleOutcome::Continue(v))
            });

        let outcome = pipeline.run(vec![], &()).await.unwrap();
        assert!(outcome.is_satisfied());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_result_is_not_satisfied() {
        let pipeline = Pipeline::new().add_fn("clear", |_, _, _| Ok(RuleOutcome::Continue(vec![])));
        let outcome = pipeline.run(vec![1], &()).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed(vec![]));
        assert_eq!(outcome.into_data(), Some(vec![]));
    }

    #[tokio::test]
    async fn test_errors_aggregate_until_throw() {
        let pipeline = Pipeline::new()
            .add_fn("first", |v, _, errors| {
                errors.add_error("first-problem", [("rule", "first")]);
                Ok(RuleOutcome::Continue(v))
            })
            .add_fn("second", |v, _, errors| {
                errors.add_error("second-problem", Vec::<(String, String)>::new());
                Ok(RuleOutcome::Continue(v))
            })
            .throw_if_errors()
            .add_fn("after", |_, _, _| panic!("must not run after a failed throw"));

        match pipeline.run(vec![], &()).await {
            Err(Error::Validation(err)) => {
                assert_eq!(err.len(), 2);
                assert_eq!(err.codes().collect::<Vec<_>>(), vec!["first-problem", "second-problem"]);
                assert_eq!(err.entries[0].params["rule"], "first");
                assert_eq!(err.status, DEFAULT_STATUS);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rule_can_abort_immediately() {
        let pipeline = Pipeline::new()
            .add_fn("note", |v, _, errors| {
                errors.add_error("noted", [("k", "v")]);
                Ok(RuleOutcome::Continue(v))
            })
            .add_fn("fatal", |_, _, errors| Err(errors.abort_with("fatal", [("why", "bad")])))
            .add_fn("never", |_, _, _| panic!("must not run after abort"));

        let err = pipeline.run(vec![], &()).await.unwrap_err();
        match err {
            Error::Validation(err) => assert_eq!(err.codes().collect::<Vec<_>>(), vec!["noted", "fatal"]),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_add_rule_when() {
        let pipeline = Pipeline::new()
            .add_rule_when(false, ThrowIfErrors)
            .add_rule_when(true, ThrowIfErrors);
        assert_eq!(pipeline.len(), 1);
    }

    #[tokio::test]
    async fn test_no_errors_passes_throw() {
        let pipeline = Pipeline::new().throw_if_errors();
        let outcome = pipeline.run(vec![7], &()).await.unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed(vec![7]));
    }

    #[test]
    fn test_display_includes_codes_and_params() {
        let mut err = ValidationError::new();
        err.add_error("missing-file", [("path", "a.js")]);
        assert_eq!(err.to_string(), "[422] missing-file (path=a.js)");
    }
}
