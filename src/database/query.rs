use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::database::error::{internal_error, invalid_argument, DatabaseResult};

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub(crate) enum QueryIndex {
    #[default]
    Default,
    Key,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum QueryLimit {
    First(u32),
    Last(u32),
}

/// Ordering and window applied to the children of a location.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct QueryParams {
    pub(crate) index: QueryIndex,
    pub(crate) start_key: Option<String>,
    pub(crate) end_key: Option<String>,
    pub(crate) limit: Option<QueryLimit>,
    order_by_called: bool,
}

impl QueryParams {
    pub(crate) fn set_index(&mut self, index: QueryIndex) -> DatabaseResult<()> {
        if self.order_by_called {
            return Err(invalid_argument("orderBy has already been specified"));
        }
        self.index = index;
        self.order_by_called = true;
        Ok(())
    }

    pub(crate) fn set_start(&mut self, key: String) -> DatabaseResult<()> {
        if self.start_key.is_some() {
            return Err(invalid_argument("startAt has already been specified"));
        }
        self.start_key = Some(key);
        Ok(())
    }

    pub(crate) fn set_end(&mut self, key: String) -> DatabaseResult<()> {
        if self.end_key.is_some() {
            return Err(invalid_argument("endAt has already been specified"));
        }
        self.end_key = Some(key);
        Ok(())
    }

    pub(crate) fn set_limit(&mut self, limit: QueryLimit) -> DatabaseResult<()> {
        if self.limit.is_some() {
            return Err(invalid_argument("limit has already been specified"));
        }
        self.limit = Some(limit);
        Ok(())
    }

    pub(crate) fn is_default(&self) -> bool {
        self.index == QueryIndex::Default
            && self.start_key.is_none()
            && self.end_key.is_none()
            && self.limit.is_none()
    }

    /// Restricts `value` to the children selected by these parameters.
    ///
    /// Backends that already filtered server-side return the same window, so
    /// applying this twice is harmless.
    pub(crate) fn apply(&self, value: Value) -> Value {
        if self.is_default() {
            return value;
        }
        let Value::Object(children) = value else {
            return value;
        };

        let mut entries: Vec<(String, Value)> = children
            .into_iter()
            .filter(|(key, _)| self.within_bounds(key))
            .collect();
        entries.sort_by(|(left, _), (right, _)| compare_keys(left, right));

        match self.limit {
            Some(QueryLimit::First(count)) => entries.truncate(count as usize),
            Some(QueryLimit::Last(count)) => {
                let skip = entries.len().saturating_sub(count as usize);
                entries.drain(..skip);
            }
            None => {}
        }

        if entries.is_empty() {
            Value::Null
        } else {
            Value::Object(entries.into_iter().collect::<Map<String, Value>>())
        }
    }

    fn within_bounds(&self, key: &str) -> bool {
        let after_start = self
            .start_key
            .as_deref()
            .map_or(true, |start| compare_keys(key, start) != Ordering::Less);
        let before_end = self
            .end_key
            .as_deref()
            .map_or(true, |end| compare_keys(key, end) != Ordering::Greater);
        after_start && before_end
    }

    pub(crate) fn to_rest_params(&self) -> DatabaseResult<Vec<(String, String)>> {
        let mut params = Vec::new();
        if self.is_default() {
            return Ok(params);
        }

        // the REST API requires an explicit orderBy whenever filters are present
        params.push(("orderBy".to_string(), encode("$key")?));

        if let Some(start) = &self.start_key {
            params.push(("startAt".to_string(), encode(start)?));
        }
        if let Some(end) = &self.end_key {
            params.push(("endAt".to_string(), encode(end)?));
        }
        match &self.limit {
            Some(QueryLimit::First(count)) => {
                params.push(("limitToFirst".to_string(), count.to_string()));
            }
            Some(QueryLimit::Last(count)) => {
                params.push(("limitToLast".to_string(), count.to_string()));
            }
            None => {}
        }

        Ok(params)
    }
}

fn encode(raw: &str) -> DatabaseResult<String> {
    serde_json::to_string(raw)
        .map_err(|err| internal_error(format!("Failed to encode query parameter: {err}")))
}

/// Compares two child keys the way the Realtime Database orders them: keys
/// that parse as 32-bit integers come first in numeric order, followed by all
/// remaining keys in lexicographic order.
pub(crate) fn compare_keys(left: &str, right: &str) -> Ordering {
    match (integer_key(left), integer_key(right)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => left.cmp(right),
    }
}

fn integer_key(key: &str) -> Option<i32> {
    let digits = key.strip_prefix('-').unwrap_or(key);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // leading zeros ("007") and "-0" are plain strings
    if (digits.len() > 1 && digits.starts_with('0')) || key == "-0" {
        return None;
    }
    key.parse::<i32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_keys_sort_before_strings() {
        let mut keys = vec!["b", "10", "a", "2", "-1", "007"];
        keys.sort_by(|a, b| compare_keys(a, b));
        assert_eq!(keys, vec!["-1", "2", "10", "007", "a", "b"]);
    }

    #[test]
    fn apply_limits_to_last_children_by_key() {
        let mut params = QueryParams::default();
        params.set_index(QueryIndex::Key).unwrap();
        params.set_limit(QueryLimit::Last(2)).unwrap();

        let value = json!({ "a": 1, "b": 2, "c": 3 });
        assert_eq!(params.apply(value), json!({ "b": 2, "c": 3 }));
    }

    #[test]
    fn apply_respects_key_bounds() {
        let mut params = QueryParams::default();
        params.set_index(QueryIndex::Key).unwrap();
        params.set_start("b".to_string()).unwrap();
        params.set_end("c".to_string()).unwrap();

        let value = json!({ "a": 1, "b": 2, "c": 3, "d": 4 });
        assert_eq!(params.apply(value), json!({ "b": 2, "c": 3 }));
        assert_eq!(params.apply(json!({ "z": 1 })), Value::Null);
    }

    #[test]
    fn duplicate_order_by_is_rejected() {
        let mut params = QueryParams::default();
        params.set_index(QueryIndex::Key).unwrap();
        let err = params.set_index(QueryIndex::Key).unwrap_err();
        assert_eq!(err.code_str(), "database/invalid-argument");
    }

    #[test]
    fn rest_params_encode_key_ordering() {
        let mut params = QueryParams::default();
        params.set_index(QueryIndex::Key).unwrap();
        params.set_limit(QueryLimit::First(5)).unwrap();

        assert_eq!(
            params.to_rest_params().unwrap(),
            vec![
                ("orderBy".to_string(), "\"$key\"".to_string()),
                ("limitToFirst".to_string(), "5".to_string()),
            ]
        );
        assert!(QueryParams::default().to_rest_params().unwrap().is_empty());
    }
}
