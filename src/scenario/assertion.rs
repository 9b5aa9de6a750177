//! End-of-scenario checks such as `errors_total < 5`.

use crate::core::{Result, SimError};
use crate::metrics::{MetricDefinition, Snapshot};
use crate::scenario::{series_exists, AssertionConfig};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::multispace0,
    combinator::{all_consuming, map, value},
    number::complete::double,
    sequence::{delimited, pair, preceded},
    IResult,
};
use serde::Serialize;
use std::fmt;

/// Comparison operator of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    fn symbol(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        }
    }
}

/// Parsed `<op> <threshold>`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Condition {
    pub op: Comparison,
    pub threshold: f64,
}

impl Condition {
    pub fn holds(&self, observed: f64) -> bool {
        let tolerance = 1e-9 * self.threshold.abs().max(1.0);
        match self.op {
            Comparison::Lt => observed < self.threshold,
            Comparison::Le => observed <= self.threshold,
            Comparison::Gt => observed > self.threshold,
            Comparison::Ge => observed >= self.threshold,
            Comparison::Eq => (observed - self.threshold).abs() <= tolerance,
            Comparison::Ne => (observed - self.threshold).abs() > tolerance,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.symbol(), self.threshold)
    }
}

/// Parse a condition such as `"< 0.05"` or `">= 10"`
pub fn parse_condition(input: &str) -> Result<Condition> {
    match all_consuming(delimited(multispace0, condition, multispace0))(input) {
        Ok((_, cond)) if cond.threshold.is_finite() => Ok(cond),
        Ok(_) => Err(SimError::parse(format!("threshold in '{}' must be finite", input))),
        Err(e) => Err(SimError::Parse {
            message: format!("invalid condition '{}': {}", input, e),
        }),
    }
}

fn condition(input: &str) -> IResult<&str, Condition> {
    map(
        pair(comparison, preceded(multispace0, double)),
        |(op, threshold)| Condition { op, threshold },
    )(input)
}

fn comparison(input: &str) -> IResult<&str, Comparison> {
    // Two-character operators first
    alt((
        value(Comparison::Le, tag("<=")),
        value(Comparison::Ge, tag(">=")),
        value(Comparison::Eq, tag("==")),
        value(Comparison::Ne, tag("!=")),
        value(Comparison::Lt, tag("<")),
        value(Comparison::Gt, tag(">")),
        value(Comparison::Eq, tag("=")),
    ))(input)
}

/// A validated assertion
#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    pub metric: String,
    pub condition: Condition,
}

/// Outcome of one assertion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionResult {
    pub metric: String,
    pub condition: String,
    /// Sum over all instances, absent when the series is unknown
    pub observed: Option<f64>,
    pub passed: bool,
}

impl Assertion {
    /// Parse the condition and check the metric exists.
    pub fn from_config(config: &AssertionConfig, metrics: &[MetricDefinition]) -> Result<Self> {
        if !series_exists(&config.metric, metrics) {
            return Err(SimError::UnknownMetric(config.metric.clone()));
        }
        Ok(Self {
            metric: config.metric.clone(),
            condition: parse_condition(&config.condition)?,
        })
    }

    pub fn evaluate(&self, snapshot: &Snapshot) -> AssertionResult {
        let observed = snapshot.total(&self.metric);
        AssertionResult {
            metric: self.metric.clone(),
            condition: self.condition.to_string(),
            observed,
            passed: observed.map_or(false, |v| self.condition.holds(v)),
        }
    }
}
