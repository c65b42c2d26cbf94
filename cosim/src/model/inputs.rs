/*!
Flattening of the `step` inputs.

The orchestrator sends `{local_eid: {attr: {remote_id: value}}}` where the
attributes are `v` (the value) and `t` (the time it is due, in steps).
Every remote entity feeding a local one gives one [`PendingRecord`].

A value may batch several values sent at different times, as a sequence
of `{"v": .., "t": ..}` objects: it is then split into as many records.
*/

use serde_json::{Map, Value};
use tracing::{debug, warn};

pub const VALUE: &str = "v";
pub const TIME: &str = "t";

/// A value to hand over to the network, on behalf of a local entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub eid: String,
    pub source: String,
    pub value: String,
    pub time: u64,
}

/// Strings are taken as is, anything else as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Times are integers, as numbers or strings; fractions are dropped.
pub fn parse_time(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(text) => {
            let text = text.trim();
            text.parse()
                .ok()
                .or_else(|| text.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64))
        }
        _ => None,
    }
}

/// `"null"` is what the other simulators send for "no value"
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty() || text == "null",
        _ => false,
    }
}

/// Cut `text` into its top level bracketed groups.
///
/// The groups may be separated by commas and blanks. Returns `None` if
/// anything else is found between the groups or the brackets do not
/// balance.
pub fn split_groups(text: &str) -> Option<Vec<&str>> {
    let mut groups = Vec::new();
    let mut stack = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (index, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '{' | '[' => {
                if stack.is_empty() {
                    start = index;
                }
                stack.push(c);
            }
            '}' | ']' => {
                let open = if c == '}' { '{' } else { '[' };
                if stack.pop() != Some(open) {
                    return None;
                }
                if stack.is_empty() {
                    groups.push(&text[start..=index]);
                }
            }
            '"' if !stack.is_empty() => in_string = true,
            ',' if stack.is_empty() => {}
            c if c.is_whitespace() => {}
            _ if stack.is_empty() => return None,
            _ => {}
        }
    }

    if !stack.is_empty() || in_string || groups.is_empty() {
        return None;
    }
    Some(groups)
}

/// The `(value, time)` pairs batched in `text`, if every group is such a
/// pair.
pub fn split_batch(text: &str) -> Option<Vec<(Value, Value)>> {
    split_groups(text)?
        .into_iter()
        .map(|group| match serde_json::from_str(group) {
            Ok(Value::Object(mut object)) => {
                let value = object.remove(VALUE)?;
                let time = object.remove(TIME)?;
                Some((value, time))
            }
            _ => None,
        })
        .collect()
}

/// Flatten the inputs of one local entity.
///
/// Values that are missing, `null` (or `"null"`) or empty are skipped, as
/// are values whose time cannot be read.
pub fn flatten_entity(eid: &str, attrs: &Map<String, Value>) -> Vec<PendingRecord> {
    let mut records = Vec::new();

    let Some(Value::Object(values)) = attrs.get(VALUE) else {
        debug!(%eid, "no value in the inputs");
        return records;
    };
    let times = match attrs.get(TIME) {
        Some(Value::Object(times)) => Some(times),
        _ => None,
    };

    for (source, value) in values {
        if is_empty(value) {
            continue;
        }

        let rendered = render(value);
        let batch = split_batch(&rendered).unwrap_or_else(|| {
            let time = times
                .and_then(|times| times.get(source))
                .cloned()
                .unwrap_or(Value::Null);
            vec![(value.clone(), time)]
        });

        for (value, time) in batch {
            if is_empty(&value) {
                continue;
            }
            let Some(time) = parse_time(&time) else {
                warn!(%eid, %source, %time, "ignoring value without a valid time");
                continue;
            };
            records.push(PendingRecord {
                eid: eid.to_owned(),
                source: source.clone(),
                value: render(&value),
                time,
            });
        }
    }

    records
}

/// Flatten the `step` inputs, in the order of the local entities.
pub fn flatten(inputs: &Map<String, Value>) -> Vec<PendingRecord> {
    inputs
        .iter()
        .flat_map(|(eid, attrs)| match attrs {
            Value::Object(attrs) => flatten_entity(eid, attrs),
            other => {
                warn!(%eid, inputs = %other, "ignoring malformed inputs");
                Vec::new()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn groups() {
        assert_eq!(
            split_groups(r#"{"v":1,"t":2}, {"v":[3,{"x":4}],"t":5}"#),
            Some(vec![r#"{"v":1,"t":2}"#, r#"{"v":[3,{"x":4}],"t":5}"#])
        );
        assert_eq!(split_groups(r#"[1,"]"]"#), Some(vec![r#"[1,"]"]"#]));
        assert_eq!(split_groups("12"), None);
        assert_eq!(split_groups("{1,2"), None);
        assert_eq!(split_groups("{1,2]"), None);
        assert_eq!(split_groups(r#"{"a":1} tail"#), None);
        assert_eq!(split_groups(""), None);
    }

    #[test]
    fn batch() {
        assert_eq!(
            split_batch(r#"{"v":"on","t":3}{"v":7,"t":"4"}"#),
            Some(vec![(json!("on"), json!(3)), (json!(7), json!("4"))])
        );
        // not every group is a value with its time
        assert_eq!(split_batch(r#"{"v":"on","t":3},{"x":1}"#), None);
        assert_eq!(split_batch("[1,2,3]"), None);
    }

    #[test]
    fn times() {
        assert_eq!(parse_time(&json!(12)), Some(12));
        assert_eq!(parse_time(&json!(12.9)), Some(12));
        assert_eq!(parse_time(&json!(" 7 ")), Some(7));
        assert_eq!(parse_time(&json!("-1")), None);
        assert_eq!(parse_time(&json!(null)), None);
    }

    #[test]
    fn flatten_per_source() {
        let inputs = object(json!({
            "H1-H2": {
                "v": {"Grid-0.bus_1": 0.5, "Grid-0.bus_2": "on", "Grid-0.bus_3": null},
                "t": {"Grid-0.bus_1": 10, "Grid-0.bus_2": "11", "Grid-0.bus_3": 12},
            }
        }));

        let records = flatten(&inputs);
        assert_eq!(
            records,
            [
                PendingRecord {
                    eid: "H1-H2".to_owned(),
                    source: "Grid-0.bus_1".to_owned(),
                    value: "0.5".to_owned(),
                    time: 10,
                },
                PendingRecord {
                    eid: "H1-H2".to_owned(),
                    source: "Grid-0.bus_2".to_owned(),
                    value: "on".to_owned(),
                    time: 11,
                },
            ]
        );
    }

    #[test]
    fn flatten_batched_value() {
        let inputs = object(json!({
            "H1-H2": {
                "v": {"Ctrl-0.c": r#"{"v":"a","t":3},{"v":{"k":1},"t":4}"#},
                "t": {"Ctrl-0.c": 4},
            }
        }));

        let records = flatten(&inputs);
        assert_eq!(records.len(), 2);
        assert_eq!((records[0].value.as_str(), records[0].time), ("a", 3));
        assert_eq!((records[1].value.as_str(), records[1].time), (r#"{"k":1}"#, 4));
    }

    #[test]
    fn flatten_skips_bad_fields() {
        let inputs = object(json!({
            "H1-H2": {
                "v": {"A.a": 1, "A.b": 2, "A.c": "", "A.d": "null"},
                "t": {"A.a": "later", "A.b": 5, "A.d": 6},
            },
            "H3-H4": "garbage",
        }));

        let records = flatten(&inputs);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, "A.b");
        assert_eq!(records[0].time, 5);
    }
}
