//! In-memory evaluation of criteria against live objects.
//!
//! Anything exposing "get property value by name" can be matched; the
//! evaluator walks the tree with short-circuiting `AND`/`OR`, applies the
//! null-comparison policy when a fetched property is null, and coerces
//! string literals toward the fetched value's type before comparing.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::ast::{ComparisonOp, Criteria, CriteriaValue, DATETIME_FORMAT, LogicalOp};

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// The fetched value cannot be ordered against the criteria literal.
    TypeMismatch { property: String, value_type: String },
    PropertyNotFound(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::TypeMismatch { property, value_type } => write!(
                f,
                "property '{}' of type '{}' does not support the requested comparison",
                property, value_type
            ),
            EvalError::PropertyNotFound(property) => {
                write!(f, "property '{}' not found on candidate", property)
            }
        }
    }
}

impl std::error::Error for EvalError {}

/// "Get property value by name" capability the evaluator needs from a
/// candidate. Implemented per candidate shape; the evaluator never commits
/// to a particular reflection mechanism.
pub trait PropertyAccess {
    fn property_value(&self, property: &str) -> Result<CriteriaValue, EvalError>;
}

impl PropertyAccess for HashMap<String, CriteriaValue> {
    fn property_value(&self, property: &str) -> Result<CriteriaValue, EvalError> {
        self.get(property)
            .cloned()
            .ok_or_else(|| EvalError::PropertyNotFound(property.to_string()))
    }
}

/// JSON objects are candidates too; numbers map to integer when they fit,
/// decimal otherwise. Arrays and nested objects are not comparable values.
impl PropertyAccess for JsonValue {
    fn property_value(&self, property: &str) -> Result<CriteriaValue, EvalError> {
        let value = self
            .get(property)
            .ok_or_else(|| EvalError::PropertyNotFound(property.to_string()))?;
        match value {
            JsonValue::Null => Ok(CriteriaValue::Null),
            JsonValue::Bool(b) => Ok(CriteriaValue::Bool(*b)),
            JsonValue::Number(n) => Ok(match n.as_i64() {
                Some(i) => CriteriaValue::Integer(i),
                None => CriteriaValue::Decimal(n.as_f64().unwrap_or(f64::NAN)),
            }),
            JsonValue::String(s) => Ok(CriteriaValue::Str(s.clone())),
            JsonValue::Array(_) => Err(EvalError::TypeMismatch {
                property: property.to_string(),
                value_type: "array".to_string(),
            }),
            JsonValue::Object(_) => Err(EvalError::TypeMismatch {
                property: property.to_string(),
                value_type: "object".to_string(),
            }),
        }
    }
}

impl Criteria {
    /// Evaluate this criteria against a candidate object.
    ///
    /// Composites short-circuit: the right subtree is not evaluated when the
    /// left already decides the result, so a candidate missing a property on
    /// the undecided side still matches cleanly.
    pub fn is_match<T: PropertyAccess>(&self, candidate: &T) -> Result<bool, EvalError> {
        match self {
            Criteria::Composite { left, op, right } => match op {
                LogicalOp::And => Ok(left.is_match(candidate)? && right.is_match(candidate)?),
                LogicalOp::Or => Ok(left.is_match(candidate)? || right.is_match(candidate)?),
            },
            Criteria::Leaf { field, op, value } => {
                let fetched = candidate.property_value(&field.property_name)?;
                if fetched.is_null() {
                    return Ok(null_match(*op, value));
                }
                let fetched = fetched.resolve();
                let literal = value.resolve();
                leaf_match(&field.property_name, &fetched, *op, &literal)
            }
        }
    }
}

/// Null-comparison policy: the fetched property value is null, so the
/// outcome is decided by the operator and the criteria's own literal.
/// Ordering against null is false in both directions, as in SQL.
fn null_match(op: ComparisonOp, literal: &CriteriaValue) -> bool {
    match op {
        ComparisonOp::Equals => literal.is_null(),
        ComparisonOp::NotEquals => !literal.is_null(),
        ComparisonOp::GreaterThan
        | ComparisonOp::LessThan
        | ComparisonOp::GreaterThanOrEqual
        | ComparisonOp::LessThanOrEqual => false,
        ComparisonOp::Like => literal.is_null(),
        ComparisonOp::NotLike => !literal.is_null(),
        ComparisonOp::Is => is_null_literal(literal),
        ComparisonOp::IsNot => !is_null_literal(literal),
    }
}

/// `IS`/`IS NOT` accept a null literal or the keyword spelled as a string,
/// in any case.
fn is_null_literal(literal: &CriteriaValue) -> bool {
    literal.is_null() || literal.to_string().eq_ignore_ascii_case("null")
}

fn leaf_match(
    property: &str,
    fetched: &CriteriaValue,
    op: ComparisonOp,
    literal: &CriteriaValue,
) -> Result<bool, EvalError> {
    match op {
        ComparisonOp::Equals => Ok(values_equal(fetched, literal)),
        ComparisonOp::NotEquals => Ok(!values_equal(fetched, literal)),
        ComparisonOp::GreaterThan => {
            Ok(ordering(property, fetched, literal)? == Ordering::Greater)
        }
        ComparisonOp::LessThan => Ok(ordering(property, fetched, literal)? == Ordering::Less),
        ComparisonOp::GreaterThanOrEqual => {
            Ok(ordering(property, fetched, literal)? != Ordering::Less)
        }
        ComparisonOp::LessThanOrEqual => {
            Ok(ordering(property, fetched, literal)? != Ordering::Greater)
        }
        ComparisonOp::Like => Ok(like_match(&literal.to_string(), &fetched.to_string())),
        ComparisonOp::NotLike => Ok(!like_match(&literal.to_string(), &fetched.to_string())),
        // the null branch was taken earlier, so the fetched value is known
        // to be non-null here
        ComparisonOp::Is => Ok(false),
        ComparisonOp::IsNot => Ok(true),
    }
}

/// Equality across incomparable types is simply false, never an error.
fn values_equal(fetched: &CriteriaValue, literal: &CriteriaValue) -> bool {
    compare_values(fetched, literal).is_some_and(|o| o == Ordering::Equal)
}

/// Ordering across incomparable types is the error case.
fn ordering(
    property: &str,
    fetched: &CriteriaValue,
    literal: &CriteriaValue,
) -> Result<Ordering, EvalError> {
    compare_values(fetched, literal).ok_or_else(|| EvalError::TypeMismatch {
        property: property.to_string(),
        value_type: fetched.type_name().to_string(),
    })
}

fn compare_values(fetched: &CriteriaValue, literal: &CriteriaValue) -> Option<Ordering> {
    use CriteriaValue::*;
    match (fetched, literal) {
        (Bool(a), Bool(b)) => Some(a.cmp(b)),
        (Integer(a), Integer(b)) => Some(a.cmp(b)),
        (Decimal(a), Decimal(b)) => a.partial_cmp(b),
        (Integer(a), Decimal(b)) => (*a as f64).partial_cmp(b),
        (Decimal(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
        (Str(a), Str(b)) => Some(a.cmp(b)),
        (DateTime(a), DateTime(b)) => Some(a.cmp(b)),
        (Guid(a), Guid(b)) => Some(a.cmp(b)),
        // a string on one side is coerced toward the typed side
        (typed, Str(s)) => {
            let coerced = coerce_str(s, typed)?;
            compare_values(typed, &coerced)
        }
        (Str(s), typed) => {
            let coerced = coerce_str(s, typed)?;
            compare_values(&coerced, typed)
        }
        _ => None,
    }
}

fn coerce_str(s: &str, target: &CriteriaValue) -> Option<CriteriaValue> {
    let s = s.trim();
    match target {
        CriteriaValue::Integer(_) => s.parse::<i64>().ok().map(CriteriaValue::Integer),
        CriteriaValue::Decimal(_) => s.parse::<f64>().ok().map(CriteriaValue::Decimal),
        CriteriaValue::Bool(_) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(CriteriaValue::Bool(true)),
            "false" => Some(CriteriaValue::Bool(false)),
            _ => None,
        },
        CriteriaValue::DateTime(_) => parse_datetime(s).map(CriteriaValue::DateTime),
        CriteriaValue::Guid(_) => {
            let trimmed = s.trim_start_matches('{').trim_end_matches('}');
            Uuid::parse_str(trimmed).ok().map(CriteriaValue::Guid)
        }
        _ => None,
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y/%m/%d")
                .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Simplified SQL LIKE: only leading and/or trailing `%` wildcards are
/// recognized. Mid-string `%` and the `_` single-character wildcard are
/// matched literally.
pub fn like_match(pattern: &str, candidate: &str) -> bool {
    let (starts_wild, rest) = match pattern.strip_prefix('%') {
        Some(rest) => (true, rest),
        None => (false, pattern),
    };
    let (ends_wild, core) = match rest.strip_suffix('%') {
        Some(core) => (true, core),
        None => (false, rest),
    };
    match (starts_wild, ends_wild) {
        (false, false) => candidate == core,
        (false, true) => candidate.starts_with(core),
        (true, false) => candidate.ends_with(core),
        (true, true) => candidate.contains(core),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ComparisonOp::*;
    use chrono::Local;
    use serde_json::json;

    fn make_candidate(pairs: &[(&str, CriteriaValue)]) -> HashMap<String, CriteriaValue> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    fn null_result(op: ComparisonOp, literal: CriteriaValue) -> bool {
        let candidate = make_candidate(&[("X", CriteriaValue::Null)]);
        Criteria::prop("X", op, literal).is_match(&candidate).unwrap()
    }

    #[test]
    fn test_null_policy_equals_and_not_equals() {
        assert!(null_result(Equals, CriteriaValue::Null));
        assert!(!null_result(Equals, CriteriaValue::Integer(5)));
        // only IS/IS NOT treat the spelled-out keyword as null
        assert!(!null_result(Equals, CriteriaValue::Str("NULL".to_string())));
        assert!(!null_result(NotEquals, CriteriaValue::Null));
        assert!(null_result(NotEquals, CriteriaValue::Integer(5)));
    }

    #[test]
    fn test_null_policy_ordering_is_always_false() {
        for op in [GreaterThan, LessThan, GreaterThanOrEqual, LessThanOrEqual] {
            assert!(!null_result(op, CriteriaValue::Integer(5)));
            assert!(!null_result(op, CriteriaValue::Null));
        }
    }

    #[test]
    fn test_null_policy_like() {
        assert!(null_result(Like, CriteriaValue::Null));
        assert!(!null_result(Like, CriteriaValue::Str("abc%".to_string())));
        assert!(!null_result(NotLike, CriteriaValue::Null));
        assert!(null_result(NotLike, CriteriaValue::Str("abc%".to_string())));
    }

    #[test]
    fn test_null_policy_is_and_is_not() {
        assert!(null_result(Is, CriteriaValue::Null));
        assert!(null_result(Is, CriteriaValue::Str("NULL".to_string())));
        assert!(null_result(Is, CriteriaValue::Str("null".to_string())));
        assert!(!null_result(Is, CriteriaValue::Str("something".to_string())));

        assert!(!null_result(IsNot, CriteriaValue::Null));
        assert!(!null_result(IsNot, CriteriaValue::Str("NULL".to_string())));
        assert!(null_result(IsNot, CriteriaValue::Str("something".to_string())));
    }

    #[test]
    fn test_is_on_non_null_value() {
        let candidate = make_candidate(&[("X", CriteriaValue::Integer(5))]);
        let is_null = Criteria::prop("X", Is, CriteriaValue::Null);
        assert!(!is_null.is_match(&candidate).unwrap());
        let is_not_null = Criteria::prop("X", IsNot, CriteriaValue::Null);
        assert!(is_not_null.is_match(&candidate).unwrap());
    }

    #[test]
    fn test_like_decomposition() {
        assert!(like_match("abc", "abc"));
        assert!(!like_match("abc", "xabc"));
        assert!(like_match("abc%", "abcdef"));
        assert!(!like_match("abc%", "xabc"));
        assert!(like_match("%abc", "xyzabc"));
        assert!(!like_match("%abc", "abcx"));
        assert!(like_match("%abc%", "zzabczz"));
        assert!(!like_match("%abc%", "zzaczz"));
        // bare wildcard matches anything
        assert!(like_match("%", "whatever"));
    }

    #[test]
    fn test_like_against_candidate() {
        let candidate = make_candidate(&[("Surname", CriteriaValue::Str("Smithson".to_string()))]);
        assert!(Criteria::prop("Surname", Like, "Smith%").is_match(&candidate).unwrap());
        assert!(!Criteria::prop("Surname", Like, "%smith").is_match(&candidate).unwrap());
        assert!(Criteria::prop("Surname", NotLike, "Jones%").is_match(&candidate).unwrap());
    }

    #[test]
    fn test_ordering_comparisons() {
        let candidate = make_candidate(&[("Age", CriteriaValue::Integer(25))]);
        assert!(Criteria::prop("Age", GreaterThan, 18).is_match(&candidate).unwrap());
        assert!(!Criteria::prop("Age", LessThan, 18).is_match(&candidate).unwrap());
        assert!(Criteria::prop("Age", GreaterThanOrEqual, 25).is_match(&candidate).unwrap());
        assert!(Criteria::prop("Age", LessThanOrEqual, 25).is_match(&candidate).unwrap());
        assert!(!Criteria::prop("Age", NotEquals, 25).is_match(&candidate).unwrap());
    }

    #[test]
    fn test_numeric_cross_type_comparison() {
        let candidate = make_candidate(&[("Height", CriteriaValue::Decimal(1.75))]);
        assert!(Criteria::prop("Height", GreaterThan, 1).is_match(&candidate).unwrap());
        let integers = make_candidate(&[("Age", CriteriaValue::Integer(5))]);
        assert!(Criteria::prop("Age", Equals, 5.0).is_match(&integers).unwrap());
    }

    #[test]
    fn test_string_literal_coercion() {
        let candidate = make_candidate(&[("Age", CriteriaValue::Integer(25))]);
        // the parsed form of a criteria carries string literals
        assert!(Criteria::prop("Age", GreaterThanOrEqual, "18").is_match(&candidate).unwrap());

        let dt = NaiveDateTime::parse_from_str("1990/06/15 00:00:00", DATETIME_FORMAT).unwrap();
        let person = make_candidate(&[("DateOfBirth", CriteriaValue::DateTime(dt))]);
        assert!(Criteria::prop("DateOfBirth", GreaterThan, "1980/01/01")
            .is_match(&person)
            .unwrap());
        assert!(Criteria::prop("DateOfBirth", Equals, "1990-06-15")
            .is_match(&person)
            .unwrap());
    }

    #[test]
    fn test_guid_coercion() {
        let id = Uuid::parse_str("12345678-1234-1234-1234-123456789012").unwrap();
        let candidate = make_candidate(&[("PersonID", CriteriaValue::Guid(id))]);
        assert!(
            Criteria::prop("PersonID", Equals, "{12345678-1234-1234-1234-123456789012}")
                .is_match(&candidate)
                .unwrap()
        );
    }

    #[test]
    fn test_type_mismatch_on_ordering() {
        let candidate = make_candidate(&[("Surname", CriteriaValue::Str("Smith".to_string()))]);
        let result = Criteria::prop("Surname", GreaterThan, true).is_match(&candidate);
        assert_eq!(
            result,
            Err(EvalError::TypeMismatch {
                property: "Surname".to_string(),
                value_type: "string".to_string(),
            })
        );
    }

    #[test]
    fn test_cross_type_equality_is_false_not_error() {
        let candidate = make_candidate(&[("Surname", CriteriaValue::Str("Smith".to_string()))]);
        assert!(!Criteria::prop("Surname", Equals, true).is_match(&candidate).unwrap());
        assert!(Criteria::prop("Surname", NotEquals, true).is_match(&candidate).unwrap());
    }

    #[test]
    fn test_property_not_found() {
        let candidate = make_candidate(&[]);
        let result = Criteria::prop("Missing", Equals, 1).is_match(&candidate);
        assert_eq!(result, Err(EvalError::PropertyNotFound("Missing".to_string())));
    }

    #[test]
    fn test_short_circuit_skips_missing_property() {
        let candidate = make_candidate(&[("A", CriteriaValue::Integer(1))]);
        let or = Criteria::composite(
            Criteria::prop("A", Equals, 1),
            LogicalOp::Or,
            Criteria::prop("Missing", Equals, 2),
        );
        assert!(or.is_match(&candidate).unwrap());

        let and = Criteria::composite(
            Criteria::prop("A", Equals, 2),
            LogicalOp::And,
            Criteria::prop("Missing", Equals, 2),
        );
        assert!(!and.is_match(&candidate).unwrap());
    }

    #[test]
    fn test_today_sentinel_resolves_per_call() {
        let yesterday = Local::now().date_naive().pred_opt().unwrap().and_time(NaiveTime::MIN);
        let candidate = make_candidate(&[("LastSeen", CriteriaValue::DateTime(yesterday))]);
        let criteria = Criteria::prop("LastSeen", LessThan, CriteriaValue::Today);
        assert!(criteria.is_match(&candidate).unwrap());
        // same tree, fresh resolution
        assert!(criteria.is_match(&candidate).unwrap());

        let now_criteria = Criteria::prop("LastSeen", LessThan, CriteriaValue::Now);
        assert!(now_criteria.is_match(&candidate).unwrap());
    }

    #[test]
    fn test_json_candidate_end_to_end() {
        let person = json!({"Surname": "Smith", "Age": 25});
        let criteria = Criteria::merge_with_and(
            Some(Criteria::prop("Surname", Equals, "Smith")),
            Some(Criteria::prop("Age", GreaterThanOrEqual, 18)),
        )
        .unwrap();
        assert_eq!(criteria.to_string(), "(Surname = 'Smith') AND (Age >= '18')");
        assert!(criteria.is_match(&person).unwrap());

        let minor = json!({"Surname": "Smith", "Age": 10});
        assert!(!criteria.is_match(&minor).unwrap());
    }

    #[test]
    fn test_json_null_property() {
        let person = json!({"Surname": null});
        assert!(Criteria::prop("Surname", Is, CriteriaValue::Null).is_match(&person).unwrap());
        assert!(Criteria::prop("Surname", Equals, CriteriaValue::Null)
            .is_match(&person)
            .unwrap());
        assert!(!Criteria::prop("Surname", GreaterThan, 5).is_match(&person).unwrap());
    }
}
