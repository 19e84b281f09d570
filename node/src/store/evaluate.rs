//! The query evaluator over the local row set.
//!
//! Evaluation is pure over the store's current state and never forwards;
//! overlay routing happens a layer above. Unknown verbs and malformed
//! parameters come back as failure results, never as panics.

use chrono::{Datelike, NaiveDate};
use overlay_protocol::messages::query::QueryRequest;
use overlay_protocol::messages::response::QueryResponse;
use overlay_protocol::types::{CrashRecord, DataEntry, DataValue};

use super::LocalStore;

fn success(query_id: &str, entries: Vec<DataEntry>) -> QueryResponse {
    QueryResponse {
        query_id: query_id.to_string(),
        success: true,
        message: format!("Found {} matching entries", entries.len()),
        entries,
        timing_data: String::new(),
    }
}

/// Orders `MM/DD/YYYY` dates as `YYYY*10000 + MM*100 + DD`.
fn date_key(raw: &str) -> Option<i32> {
    let date = NaiveDate::parse_from_str(raw, "%m/%d/%Y").ok()?;
    Some(date.year() * 10000 + date.month() as i32 * 100 + date.day() as i32)
}

fn crash_of(entry: &DataEntry) -> Option<&CrashRecord> {
    match &entry.value {
        DataValue::Crash(record) => Some(record),
        _ => None,
    }
}

impl LocalStore {
    /// Evaluates one query against the current local rows.
    pub fn evaluate(&self, request: &QueryRequest) -> QueryResponse {
        let id = request.query_id.as_str();
        let params = &request.params;

        let snapshot = match self.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => return QueryResponse::failure(id, format!("Store unavailable: {}", e)),
        };

        match request.verb.as_str() {
            "get_all" => success(id, snapshot),

            "get_by_key" => {
                let mut entries = Vec::new();
                for key in params {
                    // Missing keys are omitted silently, in param order.
                    if let Ok(Some(entry)) = self.get(key) {
                        entries.push(entry);
                    }
                }
                success(id, entries)
            }

            "get_by_prefix" => {
                let Some(prefix) = params.first() else {
                    return QueryResponse::failure(id, "get_by_prefix requires a prefix parameter");
                };
                let entries = snapshot
                    .into_iter()
                    .filter(|entry| entry.key.starts_with(prefix))
                    .collect();
                success(id, entries)
            }

            "get_by_borough" => {
                let Some(borough) = params.first() else {
                    return QueryResponse::failure(id, "get_by_borough requires a borough parameter");
                };
                let entries = snapshot
                    .into_iter()
                    .filter(|entry| {
                        crash_of(entry)
                            .map(|record| record.borough.eq_ignore_ascii_case(borough))
                            .unwrap_or(false)
                    })
                    .collect();
                success(id, entries)
            }

            "get_by_street" => {
                let Some(street) = params.first() else {
                    return QueryResponse::failure(id, "get_by_street requires a street parameter");
                };
                let needle = street.to_uppercase();
                let entries = snapshot
                    .into_iter()
                    .filter(|entry| {
                        crash_of(entry)
                            .map(|record| {
                                [&record.on_street, &record.cross_street, &record.off_street]
                                    .iter()
                                    .any(|street| street.to_uppercase().contains(&needle))
                            })
                            .unwrap_or(false)
                    })
                    .collect();
                success(id, entries)
            }

            "get_by_date_range" => {
                let (Some(from_raw), Some(to_raw)) = (params.first(), params.get(1)) else {
                    return QueryResponse::failure(
                        id,
                        "get_by_date_range requires a start and end date",
                    );
                };
                let Some(from) = date_key(from_raw) else {
                    return QueryResponse::failure(id, format!("Invalid date: {}", from_raw));
                };
                let Some(to) = date_key(to_raw) else {
                    return QueryResponse::failure(id, format!("Invalid date: {}", to_raw));
                };
                let entries = snapshot
                    .into_iter()
                    .filter(|entry| {
                        crash_of(entry)
                            .and_then(|record| date_key(&record.date))
                            .map(|key| from <= key && key <= to)
                            .unwrap_or(false)
                    })
                    .collect();
                success(id, entries)
            }

            "get_crashes_with_injuries" => {
                self.threshold_query(id, params, |record| record.injured)
            }

            "get_crashes_with_fatalities" => {
                self.threshold_query(id, params, |record| record.killed)
            }

            // Reserved verb with no local evaluation policy yet.
            "get_by_time" => success(id, Vec::new()),

            other => QueryResponse::failure(id, format!("Unknown query: {}", other)),
        }
    }

    fn threshold_query(
        &self,
        query_id: &str,
        params: &[String],
        field: impl Fn(&CrashRecord) -> i32,
    ) -> QueryResponse {
        let threshold = match params.first() {
            None => 1,
            Some(raw) => match raw.parse::<i32>() {
                Ok(n) => n,
                Err(_) => {
                    return QueryResponse::failure(query_id, format!("Invalid threshold: {}", raw))
                }
            },
        };

        let snapshot = match self.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => return QueryResponse::failure(query_id, format!("Store unavailable: {}", e)),
        };

        let entries = snapshot
            .into_iter()
            .filter(|entry| {
                crash_of(entry)
                    .map(|record| field(record) >= threshold)
                    .unwrap_or(false)
            })
            .collect();
        success(query_id, entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(verb: &str, params: &[&str]) -> QueryRequest {
        QueryRequest::new(
            "q-test",
            verb,
            params.iter().map(|p| p.to_string()).collect(),
        )
    }

    fn crash(borough: &str, date: &str, on_street: &str, injured: i32, killed: i32) -> DataValue {
        DataValue::Crash(CrashRecord {
            date: date.to_string(),
            borough: borough.to_string(),
            on_street: on_street.to_string(),
            injured,
            killed,
            ..Default::default()
        })
    }

    fn sample_store() -> LocalStore {
        let store = LocalStore::new();
        store
            .store_value("crash_0", crash("BROOKLYN", "01/15/2021", "ATLANTIC AVENUE", 2, 0))
            .unwrap();
        store
            .store_value("crash_1", crash("QUEENS", "03/20/2021", "QUEENS BOULEVARD", 0, 1))
            .unwrap();
        store
            .store_value("crash_2", crash("BROOKLYN", "06/01/2021", "FLATBUSH AVENUE", 1, 0))
            .unwrap();
        store.store_value("note", DataValue::Int32(99)).unwrap();
        store
    }

    fn keys(response: &QueryResponse) -> Vec<String> {
        let mut keys: Vec<String> = response.entries.iter().map(|e| e.key.clone()).collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_get_all() {
        let response = sample_store().evaluate(&query("get_all", &[]));

        assert!(response.success);
        assert_eq!(keys(&response), vec!["crash_0", "crash_1", "crash_2", "note"]);
        assert_eq!(response.message, "Found 4 matching entries");
    }

    #[test]
    fn test_get_by_key_in_param_order_missing_silently_omitted() {
        let response =
            sample_store().evaluate(&query("get_by_key", &["crash_2", "nope", "crash_0"]));

        assert!(response.success);
        let in_order: Vec<&str> = response.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(in_order, vec!["crash_2", "crash_0"]);
    }

    #[test]
    fn test_get_by_prefix() {
        let response = sample_store().evaluate(&query("get_by_prefix", &["crash_"]));

        assert_eq!(keys(&response), vec!["crash_0", "crash_1", "crash_2"]);
    }

    #[test]
    fn test_get_by_borough_case_insensitive() {
        let response = sample_store().evaluate(&query("get_by_borough", &["brooklyn"]));

        assert_eq!(keys(&response), vec!["crash_0", "crash_2"]);
    }

    #[test]
    fn test_get_by_street_substring() {
        let response = sample_store().evaluate(&query("get_by_street", &["avenue"]));

        assert_eq!(keys(&response), vec!["crash_0", "crash_2"]);
    }

    #[test]
    fn test_get_by_date_range() {
        let response =
            sample_store().evaluate(&query("get_by_date_range", &["02/01/2021", "12/31/2021"]));

        assert_eq!(keys(&response), vec!["crash_1", "crash_2"]);
    }

    #[test]
    fn test_get_by_date_range_rejects_malformed_date() {
        let response =
            sample_store().evaluate(&query("get_by_date_range", &["13/40/2021", "12/31/2021"]));

        assert!(!response.success);
        assert!(response.message.contains("Invalid date"));
        assert!(response.entries.is_empty());
    }

    #[test]
    fn test_injury_and_fatality_thresholds() {
        let store = sample_store();

        let injured = store.evaluate(&query("get_crashes_with_injuries", &[]));
        assert_eq!(keys(&injured), vec!["crash_0", "crash_2"]);

        let badly_injured = store.evaluate(&query("get_crashes_with_injuries", &["2"]));
        assert_eq!(keys(&badly_injured), vec!["crash_0"]);

        let fatal = store.evaluate(&query("get_crashes_with_fatalities", &[]));
        assert_eq!(keys(&fatal), vec!["crash_1"]);

        let bad_threshold = store.evaluate(&query("get_crashes_with_injuries", &["many"]));
        assert!(!bad_threshold.success);
        assert!(bad_threshold.message.contains("Invalid threshold"));
    }

    #[test]
    fn test_get_by_time_reserved_empty_success() {
        let response = sample_store().evaluate(&query("get_by_time", &["14:30"]));

        assert!(response.success);
        assert!(response.entries.is_empty());
    }

    #[test]
    fn test_unknown_verb() {
        let response = sample_store().evaluate(&query("get_by_moon_phase", &["full"]));

        assert!(!response.success);
        assert_eq!(response.message, "Unknown query: get_by_moon_phase");
    }
}
