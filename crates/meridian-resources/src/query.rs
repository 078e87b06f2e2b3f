//! Resource query contract
//!
//! Every provider lists through [`default_list`] so all kinds share one
//! filter → sort → paginate pipeline. The label selector is not applied
//! here; providers pass it to the API server.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use meridian_common::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sort by object name
pub const SORT_BY_NAME: &str = "name";
/// Sort by creation timestamp
pub const SORT_BY_CREATE_TIME: &str = "createTime";

/// Pagination window
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// Items to skip
    pub offset: usize,
    /// Maximum items to return
    pub limit: usize,
}

/// A list request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuery {
    /// Label selector passed to the API server
    #[serde(default)]
    pub label_selector: String,
    /// Sort key, `-` prefix for descending; newest first when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    /// Pagination window; everything when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<Page>,
    /// Substring the object name must contain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A list response
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ListResult {
    /// Items in the requested window
    pub items: Vec<Value>,
    /// Matching items before pagination
    pub total: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SortKey {
    Name,
    CreateTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SortSpec {
    key: SortKey,
    descending: bool,
}

impl SortSpec {
    fn parse(sort: Option<&str>) -> Result<Self, Error> {
        let Some(sort) = sort.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Self {
                key: SortKey::CreateTime,
                descending: true,
            });
        };
        let (descending, key) = match sort.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, sort),
        };
        let key = match key {
            SORT_BY_NAME => SortKey::Name,
            SORT_BY_CREATE_TIME => SortKey::CreateTime,
            other => {
                return Err(Error::validation(format!(
                    "unknown sort key {other:?}, expected {SORT_BY_NAME} or {SORT_BY_CREATE_TIME}"
                )))
            }
        };
        Ok(Self { key, descending })
    }
}

fn name_of(item: &Value) -> &str {
    item.pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

fn created_at(item: &Value) -> Option<DateTime<Utc>> {
    item.pointer("/metadata/creationTimestamp")
        .and_then(Value::as_str)
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

fn compare(spec: SortSpec, a: &Value, b: &Value) -> Ordering {
    let primary = match spec.key {
        SortKey::Name => name_of(a).cmp(name_of(b)),
        SortKey::CreateTime => created_at(a).cmp(&created_at(b)),
    };
    let ordering = primary.then_with(|| name_of(a).cmp(name_of(b)));
    if spec.descending {
        ordering.reverse()
    } else {
        ordering
    }
}

/// Filter, sort and paginate `items` per `query`
pub fn default_list(items: Vec<Value>, query: &ResourceQuery) -> Result<ListResult, Error> {
    let spec = SortSpec::parse(query.sort.as_deref())?;

    let mut items: Vec<Value> = match query.name.as_deref().filter(|n| !n.is_empty()) {
        Some(needle) => items
            .into_iter()
            .filter(|item| name_of(item).contains(needle))
            .collect(),
        None => items,
    };
    items.sort_by(|a, b| compare(spec, a, b));

    let total = items.len();
    let items = match query.page {
        Some(page) => items
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect(),
        None => items,
    };
    Ok(ListResult { items, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(name: &str, created: &str) -> Value {
        json!({ "metadata": { "name": name, "creationTimestamp": created } })
    }

    fn names(result: &ListResult) -> Vec<&str> {
        result.items.iter().map(name_of).collect()
    }

    fn fixtures() -> Vec<Value> {
        vec![
            object("web", "2024-01-02T00:00:00Z"),
            object("api", "2024-01-03T00:00:00Z"),
            object("worker", "2024-01-01T00:00:00Z"),
        ]
    }

    #[test]
    fn default_order_is_newest_first() {
        let result = default_list(fixtures(), &ResourceQuery::default()).unwrap();
        assert_eq!(names(&result), vec!["api", "web", "worker"]);
        assert_eq!(result.total, 3);
    }

    #[test]
    fn sort_keys_and_direction() {
        let by_name = ResourceQuery {
            sort: Some("name".to_string()),
            ..Default::default()
        };
        assert_eq!(
            names(&default_list(fixtures(), &by_name).unwrap()),
            vec!["api", "web", "worker"]
        );

        let by_name_desc = ResourceQuery {
            sort: Some("-name".to_string()),
            ..Default::default()
        };
        assert_eq!(
            names(&default_list(fixtures(), &by_name_desc).unwrap()),
            vec!["worker", "web", "api"]
        );

        let oldest_first = ResourceQuery {
            sort: Some("createTime".to_string()),
            ..Default::default()
        };
        assert_eq!(
            names(&default_list(fixtures(), &oldest_first).unwrap()),
            vec!["worker", "web", "api"]
        );
    }

    #[test]
    fn story_limit_caps_page_and_total_counts_everything() {
        let items: Vec<_> = (0..25)
            .map(|i| object(&format!("pod-{i:02}"), "2024-01-01T00:00:00Z"))
            .collect();
        let query = ResourceQuery {
            sort: Some("name".to_string()),
            page: Some(Page {
                offset: 20,
                limit: 10,
            }),
            ..Default::default()
        };
        let result = default_list(items, &query).unwrap();
        assert_eq!(result.total, 25);
        assert_eq!(names(&result), vec!["pod-20", "pod-21", "pod-22", "pod-23", "pod-24"]);

        let first_page = ResourceQuery {
            page: Some(Page { offset: 0, limit: 4 }),
            ..Default::default()
        };
        let items: Vec<_> = (0..9)
            .map(|i| object(&format!("n{i}"), "2024-01-01T00:00:00Z"))
            .collect();
        let result = default_list(items, &first_page).unwrap();
        assert_eq!(result.items.len(), 4);
        assert_eq!(result.total, 9);
    }

    #[test]
    fn offset_past_the_end_is_empty() {
        let query = ResourceQuery {
            page: Some(Page {
                offset: 10,
                limit: 5,
            }),
            ..Default::default()
        };
        let result = default_list(fixtures(), &query).unwrap();
        assert!(result.items.is_empty());
        assert_eq!(result.total, 3);
    }

    #[test]
    fn name_filter_runs_before_counting() {
        let query = ResourceQuery {
            name: Some("w".to_string()),
            ..Default::default()
        };
        let result = default_list(fixtures(), &query).unwrap();
        assert_eq!(names(&result), vec!["web", "worker"]);
        assert_eq!(result.total, 2);
    }

    #[test]
    fn unknown_sort_key_is_rejected() {
        let query = ResourceQuery {
            sort: Some("size".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            default_list(fixtures(), &query),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn query_wire_shape() {
        let query: ResourceQuery = serde_json::from_value(json!({
            "labelSelector": "app=web",
            "sort": "-createTime",
            "page": { "offset": 5, "limit": 10 }
        }))
        .unwrap();
        assert_eq!(query.label_selector, "app=web");
        assert_eq!(query.page, Some(Page { offset: 5, limit: 10 }));

        let empty: ResourceQuery = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty, ResourceQuery::default());
    }
}
