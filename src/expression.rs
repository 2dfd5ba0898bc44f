//! Integer-range URL expressions
//!
//! A template such as `https://cdn.example.com/seg-{{%d(1,120)}}.ts` expands
//! to one URL per integer in the range. The placeholder takes 2 or 3
//! comma-separated integers, `start,end[,step]`; `end` is inclusive and the
//! step defaults to 1. Only the first placeholder in the template is
//! expanded, any later one is left as-is.

use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

// Static patterns, verified by tests
#[allow(clippy::unwrap_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{%d.+?\}\}").unwrap());

#[allow(clippy::unwrap_used)]
static ARGUMENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{\{%d\((.+?)\)\}\}$").unwrap());

/// Parsed `{{%d(start,end[,step])}}` arguments
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntegerRange {
    /// First value
    pub start: i64,
    /// Last value (inclusive, if the step lands on it)
    pub end: i64,
    /// Increment; negative counts down
    pub step: i64,
}

impl IntegerRange {
    /// Parse the text between the parentheses
    pub fn parse(arguments: &str) -> Result<Self> {
        let values = arguments
            .split(',')
            .map(|a| a.trim().parse::<i64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| Error::InvalidExpression("wrong arguments".to_string()))?;

        let (start, end, step) = match values.as_slice() {
            [start, end] => (*start, *end, None),
            [start, end, step] => (*start, *end, Some(*step)),
            _ => return Err(Error::InvalidExpression("wrong arguments".to_string())),
        };

        // A step that never reaches `end` would produce an endless list
        if let Some(step) = step
            && ((end >= start && step <= 0) || (start >= end && step >= 0))
        {
            return Err(Error::InvalidExpression("infinite list".to_string()));
        }

        Ok(Self {
            start,
            end,
            step: step.unwrap_or(1),
        })
    }

    /// Values of the range, in iteration order
    pub fn values(&self) -> impl Iterator<Item = i64> + '_ {
        let mut next = Some(self.start);
        std::iter::from_fn(move || {
            let current = next?;
            let in_range = if self.step > 0 {
                current <= self.end
            } else {
                current >= self.end
            };
            if !in_range {
                next = None;
                return None;
            }
            next = current.checked_add(self.step);
            Some(current)
        })
    }
}

/// Expand the first integer placeholder in `expression`
///
/// A template without a placeholder yields no URLs.
pub fn expand(expression: &str) -> Result<Vec<String>> {
    let Some(found) = PLACEHOLDER.find(expression) else {
        return Ok(Vec::new());
    };

    let arguments = ARGUMENTS
        .captures(found.as_str())
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| Error::InvalidExpression(format!("malformed placeholder {}", found.as_str())))?;
    let range = IntegerRange::parse(arguments.as_str())?;

    let prefix = &expression[..found.start()];
    let suffix = &expression[found.end()..];
    let urls: Vec<String> = range
        .values()
        .map(|i| format!("{prefix}{i}{suffix}"))
        .collect();

    tracing::debug!(expression, count = urls.len(), "Expanded integer expression");
    Ok(urls)
}
