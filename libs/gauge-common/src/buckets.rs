//! Bucketing: named subsets of problem ids a metric can be restricted to.

use crate::error::{GaugeError, Result};
use crate::types::{Problem, ProblemSet};
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Bucket id → problem ids
pub type BucketingData = BTreeMap<String, Vec<String>>;

/// Persisted name of a bucketing scheme
pub fn bucketing_file_id(
    dataset_name: &str,
    filters: &BTreeMap<String, String>,
    keys_to_bucket_on: &[String],
    min_bucket_size: usize,
) -> String {
    let mut name = format!("{}__", dataset_name);
    if !filters.is_empty() {
        for (key, value) in filters {
            name.push_str(&format!("{}_{}_", key, value));
        }
        name.push_str("__");
    }
    name.push_str(&keys_to_bucket_on.join("_"));
    name.push_str(&format!("__min-bucket-size_{}", min_bucket_size));
    name
}

fn attribute_values(problem: &Problem, key: &str) -> Result<Vec<String>> {
    let value = problem
        .attribute(key)
        .ok_or_else(|| GaugeError::schema(&problem.id, format!("no attribute `{}` to bucket on", key)))?;

    let scalar = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Ok(match value {
        Value::Array(items) => items.iter().map(scalar).collect(),
        other => vec![scalar(other)],
    })
}

fn cartesian_product(columns: &[Vec<String>]) -> Vec<Vec<String>> {
    columns.iter().fold(vec![Vec::new()], |acc, column| {
        acc.iter()
            .flat_map(|prefix| {
                column.iter().map(move |value| {
                    let mut combination = prefix.clone();
                    combination.push(value.clone());
                    combination
                })
            })
            .collect()
    })
}

fn drop_small_buckets(buckets: BucketingData, min_bucket_size: usize) -> BucketingData {
    buckets
        .into_iter()
        .filter(|(bucket_id, ids)| {
            let keep = ids.len() >= min_bucket_size;
            if !keep {
                info!(bucket_id = %bucket_id, size = ids.len(), min_bucket_size, "Dropping small bucket");
            }
            keep
        })
        .collect()
}

/// Group problems by the values of `keys`.
///
/// Keys are sorted first; list-valued attributes (e.g. tags) put a problem in
/// one bucket per combination of values. Bucket ids join the values with `_`.
pub fn bucket_problems(
    problems: &ProblemSet,
    keys: &[String],
    min_bucket_size: usize,
) -> Result<BucketingData> {
    if keys.is_empty() {
        return Err(GaugeError::InvalidConfig("no keys to bucket on".into()));
    }
    let mut keys = keys.to_vec();
    keys.sort();

    let mut buckets = BucketingData::new();
    for problem in problems.iter() {
        let columns = keys
            .iter()
            .map(|key| attribute_values(problem, key))
            .collect::<Result<Vec<_>>>()?;

        for combination in cartesian_product(&columns) {
            buckets
                .entry(combination.join("_"))
                .or_default()
                .push(problem.id.clone());
        }
    }

    Ok(drop_small_buckets(buckets, min_bucket_size))
}

fn parse_date(problem: &Problem, date_key: &str) -> Result<NaiveDate> {
    let raw = match problem.attribute(date_key) {
        Some(Value::String(s)) => s,
        _ => {
            return Err(GaugeError::schema(
                &problem.id,
                format!("attribute `{}` is not a date string", date_key),
            ))
        }
    };
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        .ok_or_else(|| GaugeError::schema(&problem.id, format!("unparsable date `{}`", raw)))
}

/// Date-range buckets `[b_i, b_{i+1})` over consecutive `boundaries`,
/// labelled `"{start}_{end}"`. Problems outside every range are left out.
pub fn temporal_buckets(
    problems: &ProblemSet,
    date_key: &str,
    boundaries: &[NaiveDate],
    min_bucket_size: usize,
) -> Result<BucketingData> {
    if boundaries.len() < 2 || boundaries.windows(2).any(|w| w[0] >= w[1]) {
        return Err(GaugeError::InvalidConfig(
            "temporal bucketing needs at least two strictly increasing boundaries".into(),
        ));
    }

    let mut buckets = BucketingData::new();
    let mut outside = 0usize;
    for problem in problems.iter() {
        let date = parse_date(problem, date_key)?;
        match boundaries.windows(2).find(|w| w[0] <= date && date < w[1]) {
            Some(range) => buckets
                .entry(format!("{}_{}", range[0], range[1]))
                .or_default()
                .push(problem.id.clone()),
            None => outside += 1,
        }
    }

    if outside > 0 {
        warn!(outside, "Problems fall outside every date range");
    }
    Ok(drop_small_buckets(buckets, min_bucket_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_problem(id: &str, attributes: Value) -> Problem {
        let mut value = attributes;
        value["id"] = json!(id);
        serde_json::from_value(value).unwrap()
    }

    fn make_problems() -> ProblemSet {
        ProblemSet::from_problems(vec![
            make_problem("a", json!({"difficulty": 800, "tags": ["math", "greedy"], "date": "2022-01-10"})),
            make_problem("b", json!({"difficulty": 800, "tags": ["math"], "date": "2022-03-01T10:00:00"})),
            make_problem("c", json!({"difficulty": 1600, "tags": ["dp"], "date": "2022-07-01"})),
        ])
        .unwrap()
    }

    #[test]
    fn test_bucketing_file_id() {
        let mut filters = BTreeMap::new();
        filters.insert("split".to_string(), "test".to_string());
        let keys = vec!["difficulty".to_string()];

        assert_eq!(
            bucketing_file_id("codeforces", &filters, &keys, 5),
            "codeforces__split_test___difficulty__min-bucket-size_5"
        );
        assert_eq!(
            bucketing_file_id("codeforces", &BTreeMap::new(), &keys, 1),
            "codeforces__difficulty__min-bucket-size_1"
        );
    }

    #[test]
    fn test_bucket_by_scalar_attribute() {
        let buckets = bucket_problems(&make_problems(), &["difficulty".to_string()], 1).unwrap();
        assert_eq!(buckets["800"], vec!["a", "b"]);
        assert_eq!(buckets["1600"], vec!["c"]);
    }

    #[test]
    fn test_list_attributes_expand() {
        let keys = vec!["tags".to_string(), "difficulty".to_string()];
        let buckets = bucket_problems(&make_problems(), &keys, 1).unwrap();
        // keys sorted: difficulty, tags
        assert_eq!(buckets["800_math"], vec!["a", "b"]);
        assert_eq!(buckets["800_greedy"], vec!["a"]);
        assert_eq!(buckets["1600_dp"], vec!["c"]);
    }

    #[test]
    fn test_min_bucket_size_drops_buckets() {
        let buckets = bucket_problems(&make_problems(), &["difficulty".to_string()], 2).unwrap();
        assert!(buckets.contains_key("800"));
        assert!(!buckets.contains_key("1600"));
    }

    #[test]
    fn test_missing_attribute_is_error() {
        assert!(bucket_problems(&make_problems(), &["rating".to_string()], 1).is_err());
    }

    #[test]
    fn test_temporal_buckets() {
        let boundaries = [
            NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2022, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2022, 7, 1).unwrap(),
        ];
        let buckets = temporal_buckets(&make_problems(), "date", &boundaries, 1).unwrap();

        assert_eq!(buckets["2022-01-01_2022-06-01"], vec!["a", "b"]);
        // 2022-07-01 is the exclusive upper bound
        assert_eq!(buckets.len(), 1);
    }

    #[test]
    fn test_temporal_buckets_reject_unsorted_boundaries() {
        let boundaries = [
            NaiveDate::from_ymd_opt(2022, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
        ];
        assert!(temporal_buckets(&make_problems(), "date", &boundaries, 1).is_err());
    }
}
