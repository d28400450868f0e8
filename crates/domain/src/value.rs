//! Session memory leaves, tool arguments, and tool results all share one
//! JSON-like value representation so deep-merge and path resolution are
//! implemented once (§3 "Value representation").

use serde_json::Value;

/// Returns `true` when `v` counts as "empty/null/unset" for merge purposes
/// (§3 Session Memory invariant ii, P2).
pub fn is_unset(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty() || s == "unset",
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Deep-merge `incoming` into `base` in place.
///
/// Rules (§4.2): objects merge recursively; a leaf in `incoming` overwrites
/// the corresponding leaf in `base` only when it is "set" (P2); arrays are
/// replaced wholesale unless wrapped in an explicit append marker
/// (`{"__append__": [...]}`), in which case the items are appended to the
/// existing array (or a fresh one if `base` had none).
pub fn deep_merge(base: &mut Value, incoming: &Value) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            for (k, incoming_v) in incoming_map {
                if let Some(append_items) = as_append_marker(incoming_v) {
                    let slot = base_map
                        .entry(k.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Value::Array(arr) = slot {
                        arr.extend(append_items.iter().cloned());
                    } else {
                        *slot = Value::Array(append_items.clone());
                    }
                    continue;
                }
                if is_unset(incoming_v) {
                    continue;
                }
                match base_map.get_mut(k) {
                    Some(existing) => deep_merge(existing, incoming_v),
                    None => {
                        base_map.insert(k.clone(), incoming_v.clone());
                    }
                }
            }
        }
        (base_slot, incoming_v) => {
            if !is_unset(incoming_v) {
                *base_slot = incoming_v.clone();
            }
        }
    }
}

fn as_append_marker(v: &Value) -> Option<&Vec<Value>> {
    match v {
        Value::Object(m) if m.len() == 1 => match m.get("__append__") {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

/// Wrap `items` as an append marker for use as an update leaf.
pub fn append_marker(items: Vec<Value>) -> Value {
    let mut m = serde_json::Map::new();
    m.insert("__append__".to_string(), Value::Array(items));
    Value::Object(m)
}

/// A single segment of a dotted/bracketed path (§4.3 "Path language").
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Parse a dotted path with optional bracket indexing, e.g.
/// `customer.phone` or `items[0].name`.
fn parse_path(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    for dotted in path.split('.') {
        let mut rest = dotted;
        if let Some(bracket_start) = rest.find('[') {
            let key = &rest[..bracket_start];
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            }
            rest = &rest[bracket_start..];
            while let Some(stripped) = rest.strip_prefix('[') {
                if let Some(end) = stripped.find(']') {
                    if let Ok(idx) = stripped[..end].parse::<usize>() {
                        segments.push(Segment::Index(idx));
                    }
                    rest = &stripped[end + 1..];
                } else {
                    break;
                }
            }
        } else if !rest.is_empty() {
            segments.push(Segment::Key(rest.to_string()));
        }
    }
    segments
}

/// Read a dotted/bracketed path out of `root`. Returns `None` if any segment
/// is missing (missing paths are not an error — §4.3).
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = root;
    for seg in parse_path(path) {
        cur = match (&seg, cur) {
            (Segment::Key(k), Value::Object(m)) => m.get(k)?,
            (Segment::Index(i), Value::Array(a)) => a.get(*i)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Write a value at a dotted/bracketed path inside `root`, creating
/// intermediate objects/arrays as needed. Missing-path writes never error.
pub fn set_path(root: &mut Value, path: &str, value: Value) {
    let segments = parse_path(path);
    set_path_segments(root, &segments, value);
}

fn set_path_segments(cur: &mut Value, segments: &[Segment], value: Value) {
    let Some((head, tail)) = segments.split_first() else {
        *cur = value;
        return;
    };
    match head {
        Segment::Key(k) => {
            if !cur.is_object() {
                *cur = Value::Object(serde_json::Map::new());
            }
            let map = cur.as_object_mut().expect("just ensured object");
            let slot = map.entry(k.clone()).or_insert(Value::Null);
            if tail.is_empty() {
                *slot = value;
            } else {
                set_path_segments(slot, tail, value);
            }
        }
        Segment::Index(i) => {
            if !cur.is_array() {
                *cur = Value::Array(Vec::new());
            }
            let arr = cur.as_array_mut().expect("just ensured array");
            while arr.len() <= *i {
                arr.push(Value::Null);
            }
            if tail.is_empty() {
                arr[*i] = value;
            } else {
                set_path_segments(&mut arr[*i], tail, value);
            }
        }
    }
}

/// True iff `get_path` resolves to a non-empty/non-null/non-unset leaf —
/// the semantics required by the `is_set` transition-rule operator (§4.4).
pub fn is_set(root: &Value, path: &str) -> bool {
    get_path(root, path).map(|v| !is_unset(v)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_preserves_unmentioned_keys() {
        let mut base = json!({"customer": {"name": "Ada", "phone": "555"}});
        let incoming = json!({"customer": {"phone": "999"}});
        deep_merge(&mut base, &incoming);
        assert_eq!(base["customer"]["name"], json!("Ada"));
        assert_eq!(base["customer"]["phone"], json!("999"));
    }

    #[test]
    fn deep_merge_skips_empty_leaf() {
        let mut base = json!({"customer": {"name": "Ada"}});
        let incoming = json!({"customer": {"name": ""}});
        deep_merge(&mut base, &incoming);
        assert_eq!(base["customer"]["name"], json!("Ada"));
    }

    #[test]
    fn deep_merge_skips_null_leaf() {
        let mut base = json!({"customer": {"name": "Ada"}});
        let incoming = json!({"customer": {"name": null}});
        deep_merge(&mut base, &incoming);
        assert_eq!(base["customer"]["name"], json!("Ada"));
    }

    #[test]
    fn deep_merge_append_marker_extends_array() {
        let mut base = json!({"operations": {"notes": ["first"]}});
        let incoming = json!({"operations": {"notes": {"__append__": ["second"]}}});
        deep_merge(&mut base, &incoming);
        assert_eq!(base["operations"]["notes"], json!(["first", "second"]));
    }

    #[test]
    fn deep_merge_append_marker_creates_array_when_absent() {
        let mut base = json!({"operations": {}});
        let incoming = json!({"operations": {"notes": {"__append__": ["first"]}}});
        deep_merge(&mut base, &incoming);
        assert_eq!(base["operations"]["notes"], json!(["first"]));
    }

    #[test]
    fn deep_merge_plain_array_replaces() {
        let mut base = json!({"items": [1, 2, 3]});
        let incoming = json!({"items": [9]});
        deep_merge(&mut base, &incoming);
        assert_eq!(base["items"], json!([9]));
    }

    #[test]
    fn get_path_dotted_and_indexed() {
        let v = json!({"items": [{"name": "widget"}]});
        assert_eq!(get_path(&v, "items[0].name"), Some(&json!("widget")));
    }

    #[test]
    fn get_path_missing_returns_none() {
        let v = json!({"customer": {}});
        assert_eq!(get_path(&v, "customer.phone"), None);
    }

    #[test]
    fn set_path_creates_intermediate_structure() {
        let mut v = json!({});
        set_path(&mut v, "customer.phone", json!("555"));
        assert_eq!(v["customer"]["phone"], json!("555"));
    }

    #[test]
    fn set_path_indexed_extends_array() {
        let mut v = json!({});
        set_path(&mut v, "items[1].name", json!("widget"));
        assert_eq!(v["items"][1]["name"], json!("widget"));
        assert_eq!(v["items"][0], json!(null));
    }

    #[test]
    fn is_set_true_for_non_empty_string() {
        let v = json!({"customer": {"phone": "555"}});
        assert!(is_set(&v, "customer.phone"));
    }

    #[test]
    fn is_set_false_for_missing_path() {
        let v = json!({"customer": {}});
        assert!(!is_set(&v, "customer.phone"));
    }

    #[test]
    fn is_set_false_for_empty_string() {
        let v = json!({"customer": {"phone": ""}});
        assert!(!is_set(&v, "customer.phone"));
    }
}
