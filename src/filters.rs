//! Dataset filter contract: the five allowed keys, validation, and merging.

use crate::chart::JsonMap;
use crate::error::{BiError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire-level filter contract. Anything else is rejected at the boundary.
pub const ALLOWED_FILTER_KEYS: [&str; 5] = ["date_from", "date_to", "regions", "reps", "categories"];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y"];

/// Keep only the allowed filter keys of `args`, dropping the rest.
pub fn restrict_to_allowed(args: &JsonMap) -> JsonMap {
    let mut out = JsonMap::new();
    for key in ALLOWED_FILTER_KEYS {
        if let Some(v) = args.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    out
}

/// Merge plan-derived filters with caller-supplied ones. Explicit caller keys
/// win on conflict; non-conflicting keys are unioned.
pub fn merge(base: &JsonMap, explicit: &JsonMap) -> JsonMap {
    let mut merged = base.clone();
    for (k, v) in explicit {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Validated, typed filter set applied by the data provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub regions: Vec<String>,
    pub reps: Vec<String>,
    pub categories: Vec<String>,
}

impl QueryFilters {
    /// Strict validation for supported filters only.
    pub fn validate(raw: &JsonMap) -> Result<Self> {
        let unknown: Vec<&str> = raw
            .keys()
            .map(String::as_str)
            .filter(|k| !ALLOWED_FILTER_KEYS.contains(k))
            .collect();
        if !unknown.is_empty() {
            return Err(BiError::Filter(format!(
                "Unsupported filter key(s): {}. Allowed: {}.",
                unknown.join(", "),
                ALLOWED_FILTER_KEYS.join(", ")
            )));
        }

        let date_from = parse_optional_date(raw.get("date_from"), "date_from")?;
        let date_to = parse_optional_date(raw.get("date_to"), "date_to")?;
        if let (Some(from), Some(to)) = (date_from, date_to) {
            if from > to {
                return Err(BiError::Filter("date_from must be <= date_to.".to_string()));
            }
        }

        Ok(Self {
            date_from,
            date_to,
            regions: as_list(raw.get("regions")),
            reps: as_list(raw.get("reps")),
            categories: as_list(raw.get("categories")),
        })
    }

    /// A list restricts the dataset unless it is empty or carries the "All"
    /// sentinel.
    pub fn restricts(list: &[String]) -> bool {
        !list.is_empty() && !list.iter().any(|v| v == "All")
    }
}

fn parse_optional_date(value: Option<&Value>, key: &str) -> Result<Option<NaiveDate>> {
    let Some(value) = value else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    let s = value
        .as_str()
        .ok_or_else(|| BiError::Filter(format!("{} must be a date string.", key)))?;
    if s.is_empty() {
        return Ok(None);
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(Some(d));
        }
    }
    Err(BiError::Filter(format!(
        "{} is not a valid date (use YYYY-MM-DD).",
        s
    )))
}

fn as_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> JsonMap {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_merge_explicit_wins_and_unions() {
        let base = map(json!({"regions": ["East"], "date_from": "2025-01-01"}));
        let explicit = map(json!({"regions": ["West"]}));

        let merged = merge(&base, &explicit);
        assert_eq!(merged.get("regions"), Some(&json!(["West"])));
        assert_eq!(merged.get("date_from"), Some(&json!("2025-01-01")));
    }

    #[test]
    fn test_restrict_drops_unknown_keys() {
        let args = map(json!({"regions": ["East"], "n": 5, "foo": 1}));
        let restricted = restrict_to_allowed(&args);
        assert_eq!(restricted.len(), 1);
        assert!(restricted.contains_key("regions"));
    }

    #[test]
    fn test_validate_rejects_unknown_keys() {
        let raw = map(json!({"region": ["East"]}));
        let err = QueryFilters::validate(&raw).unwrap_err();
        assert!(err.to_string().contains("Unsupported filter key(s): region"));
        assert!(err.to_string().contains("date_from"));
    }

    #[test]
    fn test_validate_dates() {
        let raw = map(json!({"date_from": "2025-01-01", "date_to": "2025/03/31"}));
        let filters = QueryFilters::validate(&raw).unwrap();
        assert_eq!(
            filters.date_from,
            Some(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
        );
        assert_eq!(
            filters.date_to,
            Some(NaiveDate::from_ymd_opt(2025, 3, 31).unwrap())
        );

        let backwards = map(json!({"date_from": "2025-06-01", "date_to": "2025-01-01"}));
        assert!(QueryFilters::validate(&backwards).is_err());

        let garbage = map(json!({"date_from": "soon"}));
        assert!(QueryFilters::validate(&garbage).is_err());
    }

    #[test]
    fn test_all_sentinel_means_unrestricted() {
        let raw = map(json!({"regions": ["All"], "reps": ["Dana"]}));
        let filters = QueryFilters::validate(&raw).unwrap();
        assert!(!QueryFilters::restricts(&filters.regions));
        assert!(QueryFilters::restricts(&filters.reps));
        assert!(!QueryFilters::restricts(&filters.categories));
    }

    #[test]
    fn test_scalar_values_become_single_element_lists() {
        let raw = map(json!({"regions": "East"}));
        let filters = QueryFilters::validate(&raw).unwrap();
        assert_eq!(filters.regions, vec!["East".to_string()]);
    }
}
