//! Text exposition format.
//!
//! Rendering turns a [`Snapshot`] into `# HELP` / `# TYPE` blocks followed by
//! `name{k="v"} value timestamp_ms` sample lines. The parser reads the same
//! grammar back, which the integration tests and `--check-config` output use.

use crate::core::{Result, SimError};
use crate::metrics::registry::InstanceValue;
use crate::metrics::snapshot::{FamilySnapshot, Snapshot};
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while},
    character::complete::{char, satisfy, space0, space1},
    combinator::{all_consuming, map, opt, recognize, value as nom_value},
    multi::separated_list0,
    number::complete::double,
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Content type of the exposition body
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Serialize every family of `snapshot`.
///
/// Families without instances still get their HELP and TYPE lines.
pub fn render(snapshot: &Snapshot) -> Result<String> {
    let mut out = String::with_capacity(256 + snapshot.instance_count() * 96);
    for family in &snapshot.families {
        render_family(&mut out, family).map_err(|e| SimError::render(e.to_string()))?;
    }
    Ok(out)
}

fn render_family(out: &mut String, family: &FamilySnapshot) -> std::fmt::Result {
    let def = &family.definition;
    writeln!(out, "# HELP {} {}", def.name, escape_help(&def.help))?;
    writeln!(out, "# TYPE {} {}", def.name, def.kind.as_str())?;

    for sample in &family.samples {
        let labels = format_labels(sample.labels.pairs(&def.labels));
        let ts = sample.updated_ms;

        match &sample.value {
            InstanceValue::Scalar(v) => {
                writeln!(out, "{}{} {} {}", def.name, braced(&labels), format_value(*v), ts)?;
            },
            InstanceValue::Histogram { buckets, sum, count } => {
                for (boundary, cumulative) in def.buckets.iter().zip(buckets) {
                    writeln!(
                        out,
                        "{}_bucket{} {} {}",
                        def.name,
                        with_le(&labels, &format_value(*boundary)),
                        cumulative,
                        ts
                    )?;
                }
                writeln!(out, "{}_bucket{} {} {}", def.name, with_le(&labels, "+Inf"), count, ts)?;
                writeln!(out, "{}_sum{} {} {}", def.name, braced(&labels), format_value(*sum), ts)?;
                writeln!(out, "{}_count{} {} {}", def.name, braced(&labels), count, ts)?;
            },
        }
    }

    Ok(())
}

fn format_labels<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::new();
    for (i, (key, value)) in pairs.enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape_label_value(value));
        out.push('"');
    }
    out
}

fn braced(labels: &str) -> String {
    if labels.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", labels)
    }
}

fn with_le(labels: &str, le: &str) -> String {
    if labels.is_empty() {
        format!("{{le=\"{}\"}}", le)
    } else {
        format!("{{{},le=\"{}\"}}", labels, le)
    }
}

/// Format a sample value. Whole numbers print without a fraction.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

pub fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// One sample line read back from exposition text
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
    pub timestamp_ms: Option<i64>,
}

impl ParsedSample {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed exposition body
#[derive(Debug, Clone, Default)]
pub struct ParsedExposition {
    /// Family name to its `# TYPE`
    pub types: BTreeMap<String, String>,
    /// Family name to its `# HELP`
    pub help: BTreeMap<String, String>,
    pub samples: Vec<ParsedSample>,
}

impl ParsedExposition {
    pub fn series<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ParsedSample> + 'a {
        self.samples.iter().filter(move |s| s.name == name)
    }
}

/// Parse a complete exposition body, rejecting any malformed line.
pub fn parse_exposition(text: &str) -> Result<ParsedExposition> {
    let mut parsed = ParsedExposition::default();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        if let Some(comment) = line.strip_prefix('#') {
            match descriptor_line(comment) {
                Ok((_, (keyword, name, rest))) => {
                    let target = if keyword == "TYPE" {
                        &mut parsed.types
                    } else {
                        &mut parsed.help
                    };
                    target.insert(name.to_string(), rest.to_string());
                },
                // Free-form comments are allowed
                Err(_) => continue,
            }
            continue;
        }

        let sample = parse_sample_line(line).map_err(|e| SimError::Parse {
            message: format!("line {}: {}", lineno + 1, e),
        })?;
        parsed.samples.push(sample);
    }

    Ok(parsed)
}

/// Parse a single `name{labels} value [timestamp]` line.
pub fn parse_sample_line(line: &str) -> Result<ParsedSample> {
    match all_consuming(terminated(sample_line, space0))(line) {
        Ok((_, sample)) => Ok(sample),
        Err(e) => Err(SimError::Parse {
            message: format!("invalid sample line '{}': {}", line, e),
        }),
    }
}

fn sample_line(input: &str) -> IResult<&str, ParsedSample> {
    map(
        tuple((
            metric_name,
            opt(label_set),
            preceded(space1, sample_value),
            opt(preceded(space1, nom::character::complete::i64)),
        )),
        |(name, labels, value, timestamp_ms)| ParsedSample {
            name: name.to_string(),
            labels: labels.unwrap_or_default(),
            value,
            timestamp_ms,
        },
    )(input)
}

fn descriptor_line(input: &str) -> IResult<&str, (&str, &str, &str)> {
    tuple((
        preceded(space1, alt((tag("HELP"), tag("TYPE")))),
        preceded(space1, metric_name),
        preceded(space0, take_while(|_: char| true)),
    ))(input)
}

fn metric_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_' || c == ':'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == ':'),
    ))(input)
}

fn label_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn label_set(input: &str) -> IResult<&str, Vec<(String, String)>> {
    delimited(
        char('{'),
        separated_list0(
            char(','),
            map(separated_pair(label_name, char('='), quoted), |(k, v)| (k.to_string(), v)),
        ),
        pair(opt(char(',')), char('}')),
    )(input)
}

fn quoted(input: &str) -> IResult<&str, String> {
    alt((
        nom_value(String::new(), tag("\"\"")),
        delimited(
            char('"'),
            escaped_transform(
                is_not("\\\""),
                '\\',
                alt((
                    nom_value("\\", tag("\\")),
                    nom_value("\"", tag("\"")),
                    nom_value("\n", tag("n")),
                )),
            ),
            char('"'),
        ),
    ))(input)
}

fn sample_value(input: &str) -> IResult<&str, f64> {
    alt((
        nom_value(f64::INFINITY, tag("+Inf")),
        nom_value(f64::NEG_INFINITY, tag("-Inf")),
        nom_value(f64::NAN, tag("NaN")),
        double,
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::registry::MetricRegistry;
    use crate::metrics::types::{Bounds, MetricDefinition, MetricKind, MetricRole};
    use pretty_assertions::assert_eq;

    fn token_counter() -> MetricDefinition {
        MetricDefinition {
            name: "otel_claude_code_token_usage_tokens_total".to_string(),
            kind: MetricKind::Counter,
            help: "Token usage".to_string(),
            labels: vec!["model".to_string(), "token_type".to_string()],
            label_values: BTreeMap::from([
                ("model".to_string(), vec!["claude-3-sonnet".to_string()]),
                ("token_type".to_string(), vec!["input".to_string()]),
            ]),
            bounds: Bounds::new(0.0, 1e9),
            rate_bounds: None,
            initial: 0.0,
            drift: 0.0,
            volatility: 0.0,
            buckets: Vec::new(),
            role: MetricRole::General,
        }
    }

    fn duration_histogram() -> MetricDefinition {
        MetricDefinition {
            name: "session_duration_seconds".to_string(),
            kind: MetricKind::Histogram,
            help: "Session length".to_string(),
            labels: vec!["user_type".to_string()],
            label_values: BTreeMap::new(),
            bounds: Bounds::new(0.0, 7200.0),
            rate_bounds: None,
            initial: 0.0,
            drift: 0.0,
            volatility: 0.0,
            buckets: vec![10.0, 60.0, 300.0],
            role: MetricRole::General,
        }
    }

    #[test]
    fn test_counter_line() {
        let def = token_counter();
        let mut reg = MetricRegistry::new(std::slice::from_ref(&def));
        reg.observe(
            &def,
            &[("model", "claude-3-sonnet"), ("token_type", "input")],
            1500.0,
            1_700_000_000_000,
        )
        .unwrap();

        let text = render(&reg.snapshot(1, 1_700_000_000_000)).unwrap();
        assert_eq!(
            text,
            "# HELP otel_claude_code_token_usage_tokens_total Token usage\n\
             # TYPE otel_claude_code_token_usage_tokens_total counter\n\
             otel_claude_code_token_usage_tokens_total{model=\"claude-3-sonnet\",token_type=\"input\"} 1500 1700000000000\n"
        );

        let parsed = parse_exposition(&text).unwrap();
        let sample = &parsed.samples[0];
        assert_eq!(sample.label("model"), Some("claude-3-sonnet"));
        assert_eq!(sample.value, 1500.0);
        assert_eq!(sample.timestamp_ms, Some(1_700_000_000_000));
        assert_eq!(
            parsed.types.get("otel_claude_code_token_usage_tokens_total").map(String::as_str),
            Some("counter")
        );
    }

    #[test]
    fn test_histogram_series() {
        let def = duration_histogram();
        let mut reg = MetricRegistry::new(std::slice::from_ref(&def));
        for v in [5.0, 45.0, 4000.0] {
            reg.observe(&def, &[("user_type", "power")], v, 42).unwrap();
        }

        let parsed = parse_exposition(&render(&reg.snapshot(1, 42)).unwrap()).unwrap();
        let buckets: Vec<(String, f64)> = parsed
            .series("session_duration_seconds_bucket")
            .map(|s| (s.label("le").unwrap_or_default().to_string(), s.value))
            .collect();
        assert_eq!(
            buckets,
            vec![
                ("10".to_string(), 1.0),
                ("60".to_string(), 2.0),
                ("300".to_string(), 2.0),
                ("+Inf".to_string(), 3.0),
            ]
        );

        let count = parsed.series("session_duration_seconds_count").next().unwrap();
        let sum = parsed.series("session_duration_seconds_sum").next().unwrap();
        assert_eq!(count.value, 3.0);
        assert_eq!(sum.value, 4050.0);
    }

    #[test]
    fn test_empty_snapshot_renders_headers_only() {
        let defs = [token_counter(), duration_histogram()];
        let text = render(&Snapshot::empty(&defs, 0)).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(text.lines().all(|l| l.starts_with('#')));
        assert!(parse_exposition(&text).unwrap().samples.is_empty());
    }

    #[test]
    fn test_label_escaping_round_trip() {
        let raw = "quote\" back\\slash\nnewline";
        let line = format!("m{{k=\"{}\"}} 1", escape_label_value(raw));
        let sample = parse_sample_line(&line).unwrap();
        assert_eq!(sample.label("k"), Some(raw));
        assert_eq!(sample.timestamp_ms, None);
    }

    #[test]
    fn test_parse_edge_cases() {
        let empty = parse_sample_line("m{k=\"\"} 0 1").unwrap();
        assert_eq!(empty.label("k"), Some(""));

        let bare = parse_sample_line("up 1").unwrap();
        assert!(bare.labels.is_empty());

        assert!(parse_sample_line("m +Inf").unwrap().value.is_infinite());
        assert!(parse_sample_line("m{k=\"v\",} 2.5e3").is_ok());
        assert!(parse_sample_line("m{k=v} 1").is_err());
        assert!(parse_sample_line("m{k=\"v\"}").is_err());
        assert!(parse_sample_line("9m 1").is_err());
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(1500.0), "1500");
        assert_eq!(format_value(0.25), "0.25");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NAN), "NaN");
    }
}
