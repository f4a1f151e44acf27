//! Expression grammars for condition triggers and retention exceptions.
//!
//! Both grammars are parsed once at load time; raw expression strings never
//! reach the scheduler or the executor.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use daskeeper_core::MetricSnapshot;

// ── Metric conditions (`storage.utilization > 85`) ──────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MetricOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
}

impl MetricOp {
    fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            MetricOp::Gt => value > threshold,
            MetricOp::Gte => value >= threshold,
            MetricOp::Lt => value < threshold,
            MetricOp::Lte => value <= threshold,
            MetricOp::Eq => (value - threshold).abs() <= f64::EPSILON,
            MetricOp::Neq => (value - threshold).abs() > f64::EPSILON,
        }
    }
}

impl FromStr for MetricOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(MetricOp::Gt),
            ">=" => Ok(MetricOp::Gte),
            "<" => Ok(MetricOp::Lt),
            "<=" => Ok(MetricOp::Lte),
            "==" => Ok(MetricOp::Eq),
            "!=" => Ok(MetricOp::Neq),
            other => Err(format!("unknown comparison operator '{other}'")),
        }
    }
}

/// Metric fields a condition trigger can reference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MetricField {
    StorageUtilization,
}

impl FromStr for MetricField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "storage.utilization" => Ok(MetricField::StorageUtilization),
            other => Err(format!("unknown metric '{other}'")),
        }
    }
}

/// A parsed condition-trigger expression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionExpr {
    pub metric: MetricField,
    pub op: MetricOp,
    pub threshold: f64,
}

impl ConditionExpr {
    pub fn evaluate(&self, snapshot: &MetricSnapshot) -> bool {
        let value = match self.metric {
            MetricField::StorageUtilization => snapshot.storage_utilization_pct,
        };
        self.op.holds(value, self.threshold)
    }
}

impl FromStr for ConditionExpr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let metric = parts
            .next()
            .ok_or_else(|| "empty condition expression".to_string())?
            .parse()?;
        let op = parts
            .next()
            .ok_or_else(|| format!("condition '{s}' is missing a comparison operator"))?
            .parse()?;
        let threshold_str = parts
            .next()
            .ok_or_else(|| format!("condition '{s}' is missing a threshold"))?;
        let threshold: f64 = threshold_str
            .parse()
            .map_err(|_| format!("threshold '{threshold_str}' is not a number"))?;
        if parts.next().is_some() {
            return Err(format!("trailing tokens in condition '{s}'"));
        }
        Ok(ConditionExpr { metric, op, threshold })
    }
}

// ── Metadata predicates (`metadata.priority == 'high'`) ─────────────

/// A parsed retention-exception condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetadataPredicate {
    pub key: String,
    pub negated: bool,
    pub value: String,
}

impl MetadataPredicate {
    pub fn matches(&self, attributes: &HashMap<String, String>) -> bool {
        let equal = attributes.get(&self.key).map(String::as_str) == Some(self.value.as_str());
        equal != self.negated
    }
}

impl FromStr for MetadataPredicate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let field = parts
            .next()
            .ok_or_else(|| "empty exception condition".to_string())?;
        let key = field
            .strip_prefix("metadata.")
            .ok_or_else(|| format!("exception condition '{s}' must reference metadata.<key>"))?;
        if key.is_empty() {
            return Err(format!("exception condition '{s}' has an empty metadata key"));
        }

        let op = parts
            .next()
            .ok_or_else(|| format!("exception condition '{s}' is missing an operator"))?;
        let negated = match op {
            "==" => false,
            "!=" => true,
            other => return Err(format!("unsupported exception operator '{other}'")),
        };

        let literal = parts
            .next()
            .ok_or_else(|| format!("exception condition '{s}' is missing a value"))?;
        if parts.next().is_some() {
            return Err(format!("trailing tokens in exception condition '{s}'"));
        }
        let value = literal
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .ok_or_else(|| format!("exception value {literal} must be single-quoted"))?;

        Ok(MetadataPredicate {
            key: key.to_string(),
            negated,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(pct: f64) -> MetricSnapshot {
        MetricSnapshot {
            storage_utilization_pct: pct,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn parse_and_evaluate_threshold() {
        let expr: ConditionExpr = "storage.utilization > 85".parse().unwrap();
        assert!(expr.evaluate(&snapshot(90.0)));
        assert!(!expr.evaluate(&snapshot(85.0)));
    }

    #[test]
    fn parse_all_operators() {
        for op in [">", ">=", "<", "<=", "==", "!="] {
            let s = format!("storage.utilization {op} 50");
            assert!(s.parse::<ConditionExpr>().is_ok(), "operator {op}");
        }
    }

    #[test]
    fn reject_unknown_metric() {
        let err = "cpu.load > 1".parse::<ConditionExpr>().unwrap_err();
        assert!(err.contains("unknown metric"));
    }

    #[test]
    fn reject_trailing_tokens() {
        assert!("storage.utilization > 85 extra"
            .parse::<ConditionExpr>()
            .is_err());
    }

    #[test]
    fn reject_non_numeric_threshold() {
        assert!("storage.utilization > high".parse::<ConditionExpr>().is_err());
    }

    #[test]
    fn predicate_equality_match() {
        let pred: MetadataPredicate = "metadata.priority == 'high'".parse().unwrap();
        let mut attrs = HashMap::new();
        attrs.insert("priority".to_string(), "high".to_string());
        assert!(pred.matches(&attrs));

        attrs.insert("priority".to_string(), "low".to_string());
        assert!(!pred.matches(&attrs));
    }

    #[test]
    fn predicate_missing_key_does_not_match() {
        let pred: MetadataPredicate = "metadata.priority == 'high'".parse().unwrap();
        assert!(!pred.matches(&HashMap::new()));
    }

    #[test]
    fn predicate_negation() {
        let pred: MetadataPredicate = "metadata.tagged != 'preserve'".parse().unwrap();
        let mut attrs = HashMap::new();
        attrs.insert("tagged".to_string(), "standard".to_string());
        assert!(pred.matches(&attrs));

        attrs.insert("tagged".to_string(), "preserve".to_string());
        assert!(!pred.matches(&attrs));

        // Absent key satisfies the inequality.
        assert!(pred.matches(&HashMap::new()));
    }

    #[test]
    fn predicate_requires_quoted_value() {
        assert!("metadata.priority == high".parse::<MetadataPredicate>().is_err());
    }

    #[test]
    fn predicate_requires_metadata_prefix() {
        assert!("priority == 'high'".parse::<MetadataPredicate>().is_err());
    }
}
