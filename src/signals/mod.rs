pub mod catalog;

use std::fmt;
use std::sync::Arc;

use crate::error::EngineError;
use crate::fetch::{FetchSpec, Payload};

/// One scoring signal: how to fetch it, how to reduce the raw payload to a
/// typed value, and how to score and render that value.
///
/// `plan`, `reduce`, `score`, and `format` are pure; all I/O lives in the
/// fetcher. The typed `Value` makes `score` and `format` total over
/// everything `reduce` can produce.
pub trait Signal: Send + Sync + 'static {
    type Value: Into<MetricValue> + Clone + fmt::Debug + Send;

    const NAME: &'static str;

    fn plan(&self, identity: &str) -> FetchSpec;
    fn reduce(&self, payload: Payload) -> Result<Self::Value, EngineError>;
    fn score(&self, value: &Self::Value) -> f64;
    fn format(&self, value: &Self::Value) -> String;
}

/// Object-safe view of a [`Signal`] as the engine drives it.
pub trait Metric: Send + Sync {
    fn name(&self) -> &'static str;
    fn plan(&self, identity: &str) -> FetchSpec;
    /// Reduce, score, and format a fetched payload in one step.
    fn evaluate(&self, payload: Payload) -> Result<MetricResult, EngineError>;
}

impl<S: Signal> Metric for S {
    fn name(&self) -> &'static str {
        S::NAME
    }

    fn plan(&self, identity: &str) -> FetchSpec {
        Signal::plan(self, identity)
    }

    fn evaluate(&self, payload: Payload) -> Result<MetricResult, EngineError> {
        let value = self.reduce(payload)?;
        let delta = self.score(&value);
        let formatted = self.format(&value);
        Ok(MetricResult {
            name: S::NAME,
            value: value.into(),
            delta,
            formatted,
        })
    }
}

/// A signal's typed semantic value, erased for display and snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Count(u64),
    Days(f64),
    PerMonth(f64),
    Block(BlockStatus),
    Page(PageState),
    Groups(Vec<String>),
}

/// Age of an account, in days.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Days(pub f64);

/// Average edits per month over the trailing year.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerMonth(pub f64);

/// Block standing of an account.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockStatus {
    /// Currently blocked with no expiry.
    Indefinite,
    /// Currently blocked until the given expiry.
    Temporary(String),
    /// Never blocked.
    Clean,
    /// Blocked in the past but not now.
    Past { count: u64, days_since_last: f64 },
}

/// Existence state of the account's user page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Missing,
    Redirect,
    Exists,
}

impl From<u64> for MetricValue {
    fn from(n: u64) -> Self {
        MetricValue::Count(n)
    }
}

impl From<Days> for MetricValue {
    fn from(d: Days) -> Self {
        MetricValue::Days(d.0)
    }
}

impl From<PerMonth> for MetricValue {
    fn from(m: PerMonth) -> Self {
        MetricValue::PerMonth(m.0)
    }
}

impl From<BlockStatus> for MetricValue {
    fn from(b: BlockStatus) -> Self {
        MetricValue::Block(b)
    }
}

impl From<PageState> for MetricValue {
    fn from(p: PageState) -> Self {
        MetricValue::Page(p)
    }
}

impl From<Vec<String>> for MetricValue {
    fn from(groups: Vec<String>) -> Self {
        MetricValue::Groups(groups)
    }
}

/// Emitted at most once per signal, in completion order.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricResult {
    pub name: &'static str,
    pub value: MetricValue,
    pub delta: f64,
    pub formatted: String,
}

/// The full signal catalog. Built once at startup and read-only afterwards.
pub fn default_signals(page_limit: u32) -> Vec<Arc<dyn Metric>> {
    vec![
        Arc::new(catalog::EditCount),
        Arc::new(catalog::Blocks),
        Arc::new(catalog::AccountAge),
        Arc::new(catalog::UserPage),
        Arc::new(catalog::UserRights),
        Arc::new(catalog::PagesCreated { limit: page_limit }),
        Arc::new(catalog::Activity { limit: page_limit }),
    ]
}
