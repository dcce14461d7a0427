// 🩹 Patch Engine - structured diffs between tool snapshots
//
// Patches follow RFC 6902 (JSON Patch), addressed by RFC 6901 pointers:
//
//   [{"op": "replace", "path": "/title", "value": "Foo2"}]
//
// diff(A, B) is deterministic: same snapshots → same operations, same order.
// apply(S, P) is all-or-nothing: it works on a copy and the input is never
// touched, so a conflict leaves nothing half-applied.

use crate::error::{CatalogError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// PATCH MODEL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: Value },
}

impl PatchOperation {
    pub fn name(&self) -> &'static str {
        match self {
            PatchOperation::Add { .. } => "add",
            PatchOperation::Remove { .. } => "remove",
            PatchOperation::Replace { .. } => "replace",
            PatchOperation::Move { .. } => "move",
            PatchOperation::Copy { .. } => "copy",
            PatchOperation::Test { .. } => "test",
        }
    }

    /// Target path of the operation
    pub fn path(&self) -> &str {
        match self {
            PatchOperation::Add { path, .. }
            | PatchOperation::Remove { path }
            | PatchOperation::Replace { path, .. }
            | PatchOperation::Move { path, .. }
            | PatchOperation::Copy { path, .. }
            | PatchOperation::Test { path, .. } => path,
        }
    }
}

/// Ordered list of operations. Serializes as a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(pub Vec<PatchOperation>);

impl Patch {
    pub fn operations(&self) -> &[PatchOperation] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PatchOperation> {
        self.0.iter()
    }
}

// ============================================================================
// PATCH ENGINE
// ============================================================================

pub struct PatchEngine {
    /// Top-level fields ignored when diffing (default: modified_date)
    pub excluded_fields: Vec<String>,
}

impl PatchEngine {
    pub fn new() -> Self {
        Self::with_excluded_fields(vec!["modified_date".to_string()])
    }

    pub fn with_excluded_fields(excluded_fields: Vec<String>) -> Self {
        PatchEngine { excluded_fields }
    }

    /// Operations turning `left` into `right`, ignoring excluded fields
    pub fn diff(&self, left: &Value, right: &Value) -> Patch {
        diff(&self.strip_excluded(left), &self.strip_excluded(right))
    }

    pub fn apply(&self, snapshot: &Value, patch: &Patch) -> Result<Value> {
        apply_patch(snapshot, patch)
    }

    fn strip_excluded(&self, snapshot: &Value) -> Value {
        let mut stripped = snapshot.clone();
        if let Value::Object(map) = &mut stripped {
            for field in &self.excluded_fields {
                map.remove(field);
            }
        }
        stripped
    }
}

impl Default for PatchEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// DIFF
// ============================================================================

pub fn diff(left: &Value, right: &Value) -> Patch {
    let mut operations = Vec::new();
    diff_values("", left, right, &mut operations);
    Patch(operations)
}

/// Objects: remove / recurse in key order, then add new keys.
/// Arrays: see `diff_arrays`.
/// Anything else that differs is a replace.
fn diff_values(path: &str, left: &Value, right: &Value, ops: &mut Vec<PatchOperation>) {
    match (left, right) {
        (Value::Object(l), Value::Object(r)) => {
            for (key, lv) in l {
                let child = format!("{}/{}", path, escape_token(key));
                match r.get(key) {
                    Some(rv) => diff_values(&child, lv, rv, ops),
                    None => ops.push(PatchOperation::Remove { path: child }),
                }
            }
            for (key, rv) in r {
                if !l.contains_key(key) {
                    ops.push(PatchOperation::Add {
                        path: format!("{}/{}", path, escape_token(key)),
                        value: rv.clone(),
                    });
                }
            }
        }
        (Value::Array(l), Value::Array(r)) => diff_arrays(path, l, r, ops),
        _ => {
            if left != right {
                ops.push(PatchOperation::Replace {
                    path: path.to_string(),
                    value: right.clone(),
                });
            }
        }
    }
}

/// Minimal edit script between two arrays. The common prefix and suffix are
/// skipped and the middle is aligned on its longest common subsequence, so an
/// inserted or deleted element costs one `add` or `remove`. An unmatched pair
/// at the same position is diffed in place. Surplus elements at the end are
/// removed last index first.
fn diff_arrays(path: &str, l: &[Value], r: &[Value], ops: &mut Vec<PatchOperation>) {
    let prefix = l.iter().zip(r).take_while(|(a, b)| a == b).count();
    let suffix = l[prefix..]
        .iter()
        .rev()
        .zip(r[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let left = &l[prefix..l.len() - suffix];
    let right = &r[prefix..r.len() - suffix];
    let (n, m) = (left.len(), right.len());

    // lcs[i][j]: longest common subsequence of left[i..] and right[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if left[i] == right[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    // `pos` is the index in the partially patched array
    let (mut i, mut j, mut pos) = (0, 0, prefix);
    while i < n || j < m {
        if j == m {
            for k in (0..n - i).rev() {
                ops.push(PatchOperation::Remove {
                    path: format!("{}/{}", path, pos + k),
                });
            }
            break;
        }

        if i < n && left[i] == right[j] {
            i += 1;
            j += 1;
            pos += 1;
        } else if i < n && lcs[i + 1][j + 1] == lcs[i][j] {
            diff_values(&format!("{}/{}", path, pos), &left[i], &right[j], ops);
            i += 1;
            j += 1;
            pos += 1;
        } else if i == n || lcs[i][j + 1] >= lcs[i + 1][j] {
            ops.push(PatchOperation::Add {
                path: format!("{}/{}", path, pos),
                value: right[j].clone(),
            });
            j += 1;
            pos += 1;
        } else {
            ops.push(PatchOperation::Remove {
                path: format!("{}/{}", path, pos),
            });
            i += 1;
        }
    }
}

fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape_token(token: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return Err(format!("invalid escape in pointer token '{}'", token)),
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

// ============================================================================
// APPLY
// ============================================================================

pub fn apply_patch(snapshot: &Value, patch: &Patch) -> Result<Value> {
    let mut working = snapshot.clone();

    for (index, op) in patch.iter().enumerate() {
        apply_operation(&mut working, op).map_err(|reason| CatalogError::PatchConflict {
            index,
            op: op.name().to_string(),
            path: op.path().to_string(),
            reason,
        })?;
    }

    Ok(working)
}

type OpResult<T> = std::result::Result<T, String>;

fn apply_operation(doc: &mut Value, op: &PatchOperation) -> OpResult<()> {
    match op {
        PatchOperation::Add { path, value } => add(doc, path, value.clone()),
        PatchOperation::Remove { path } => remove(doc, path).map(|_| ()),
        PatchOperation::Replace { path, value } => {
            let target = lookup_mut(doc, path)?;
            *target = value.clone();
            Ok(())
        }
        PatchOperation::Move { from, path } => {
            lookup(doc, from)?;
            if from == path {
                return Ok(());
            }
            if path.starts_with(&format!("{}/", from)) {
                return Err("cannot move a value into one of its own children".to_string());
            }
            let value = remove(doc, from)?;
            add(doc, path, value)
        }
        PatchOperation::Copy { from, path } => {
            let value = lookup(doc, from)?.clone();
            add(doc, path, value)
        }
        PatchOperation::Test { path, value } => {
            if lookup(doc, path)? == value {
                Ok(())
            } else {
                Err(format!("value at {} does not match", path))
            }
        }
    }
}

fn add(doc: &mut Value, path: &str, value: Value) -> OpResult<()> {
    if path.is_empty() {
        *doc = value;
        return Ok(());
    }

    let (parent_path, token) = split_pointer(path)?;
    let parent = doc
        .pointer_mut(parent_path)
        .ok_or_else(|| format!("parent {} does not exist", display_path(parent_path)))?;

    match parent {
        Value::Object(map) => {
            if map.contains_key(&token) {
                return Err(format!("{} already exists", path));
            }
            map.insert(token, value);
            Ok(())
        }
        Value::Array(items) => {
            if token == "-" {
                items.push(value);
                return Ok(());
            }
            let index = parse_index(&token)?;
            if index > items.len() {
                return Err(format!("index {} out of bounds (length {})", index, items.len()));
            }
            items.insert(index, value);
            Ok(())
        }
        _ => Err(format!("parent {} is not a container", display_path(parent_path))),
    }
}

fn remove(doc: &mut Value, path: &str) -> OpResult<Value> {
    if path.is_empty() {
        return Err("cannot remove the document root".to_string());
    }

    let (parent_path, token) = split_pointer(path)?;
    let parent = doc
        .pointer_mut(parent_path)
        .ok_or_else(|| format!("parent {} does not exist", display_path(parent_path)))?;

    match parent {
        Value::Object(map) => map
            .remove(&token)
            .ok_or_else(|| format!("{} does not exist", path)),
        Value::Array(items) => {
            let index = parse_index(&token)?;
            if index >= items.len() {
                return Err(format!("index {} out of bounds (length {})", index, items.len()));
            }
            Ok(items.remove(index))
        }
        _ => Err(format!("parent {} is not a container", display_path(parent_path))),
    }
}

fn lookup<'a>(doc: &'a Value, path: &str) -> OpResult<&'a Value> {
    check_pointer(path)?;
    doc.pointer(path)
        .ok_or_else(|| format!("{} does not exist", display_path(path)))
}

fn lookup_mut<'a>(doc: &'a mut Value, path: &str) -> OpResult<&'a mut Value> {
    check_pointer(path)?;
    doc.pointer_mut(path)
        .ok_or_else(|| format!("{} does not exist", display_path(path)))
}

/// "/a/b~1c" → ("/a", "b/c")
fn split_pointer(path: &str) -> OpResult<(&str, String)> {
    check_pointer(path)?;
    // check_pointer guarantees a leading '/' for non-empty paths
    let cut = path.rfind('/').unwrap_or(0);
    Ok((&path[..cut], unescape_token(&path[cut + 1..])?))
}

fn check_pointer(path: &str) -> OpResult<()> {
    if path.is_empty() {
        return Ok(());
    }
    if !path.starts_with('/') {
        return Err(format!("malformed pointer '{}'", path));
    }
    for token in path[1..].split('/') {
        unescape_token(token)?;
    }
    Ok(())
}

/// Array indices: no sign, no leading zeros
fn parse_index(token: &str) -> OpResult<usize> {
    if token.starts_with('+') || (token.starts_with('0') && token.len() > 1) {
        return Err(format!("invalid array index '{}'", token));
    }
    token
        .parse()
        .map_err(|_| format!("invalid array index '{}'", token))
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "(root)"
    } else {
        path
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conflict_index(result: Result<Value>) -> usize {
        match result {
            Err(CatalogError::PatchConflict { index, .. }) => index,
            other => panic!("expected patch conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_single_field_replace() {
        let left = json!({"name": "toolforge-foo", "title": "Foo"});
        let right = json!({"name": "toolforge-foo", "title": "Foo2"});

        let patch = diff(&left, &right);

        assert_eq!(
            patch.operations(),
            &[PatchOperation::Replace {
                path: "/title".to_string(),
                value: json!("Foo2"),
            }]
        );
    }

    #[test]
    fn test_wire_format() {
        let patch = Patch(vec![
            PatchOperation::Replace {
                path: "/title".to_string(),
                value: json!("Foo2"),
            },
            PatchOperation::Move {
                from: "/a".to_string(),
                path: "/b".to_string(),
            },
        ]);

        let wire = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            wire,
            json!([
                {"op": "replace", "path": "/title", "value": "Foo2"},
                {"op": "move", "from": "/a", "path": "/b"},
            ])
        );

        let back: Patch = serde_json::from_value(wire).unwrap();
        assert_eq!(back, patch);
    }

    #[test]
    fn test_diff_round_trip_nested() {
        let left = json!({
            "title": "Foo",
            "keywords": ["a", "b", "c"],
            "sponsor": ["WMF"],
            "url_alternates": [{"url": "https://a", "language": "de"}],
            "author": null,
            "gone": true,
        });
        let right = json!({
            "title": "Foo",
            "keywords": ["a", "x"],
            "sponsor": ["WMF", "WMDE", "WMUK"],
            "url_alternates": [
                {"url": "https://b", "language": "de"},
                {"url": "https://c", "language": "fr"},
            ],
            "author": "Someone",
            "new": {"a/b": 1, "t~": 2},
        });

        let patch = diff(&left, &right);
        let applied = apply_patch(&left, &patch).unwrap();

        assert_eq!(applied, right);
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let doc = json!({"title": "Foo", "keywords": ["a"]});
        assert!(diff(&doc, &doc).is_empty());
    }

    #[test]
    fn test_diff_is_deterministic() {
        let left = json!({"b": 1, "a": [1, 2, 3], "c": {"x": 1}});
        let right = json!({"a": [1], "c": {"y": 2}, "d": 4});

        let first = diff(&left, &right);
        for _ in 0..10 {
            assert_eq!(diff(&left, &right), first);
        }
    }

    #[test]
    fn test_array_shrink_removes_from_the_end() {
        let patch = diff(&json!({"k": [1, 2, 3, 4]}), &json!({"k": [1, 2]}));

        let paths: Vec<&str> = patch.iter().map(|op| op.path()).collect();
        assert_eq!(paths, vec!["/k/3", "/k/2"]);
    }

    #[test]
    fn test_array_remove_first_is_single_op() {
        let patch = diff(&json!({"keywords": ["a", "b", "c"]}), &json!({"keywords": ["b", "c"]}));

        assert_eq!(
            patch.operations(),
            &[PatchOperation::Remove {
                path: "/keywords/0".to_string()
            }]
        );
    }

    #[test]
    fn test_array_insert_front_is_single_op() {
        let patch = diff(&json!({"keywords": ["b", "c"]}), &json!({"keywords": ["a", "b", "c"]}));

        assert_eq!(
            patch.operations(),
            &[PatchOperation::Add {
                path: "/keywords/0".to_string(),
                value: json!("a"),
            }]
        );
    }

    #[test]
    fn test_array_middle_edits() {
        let left = json!({"k": ["a", "b", "c", "d"]});
        let right = json!({"k": ["b", "c", "x", "d"]});

        let patch = diff(&left, &right);

        assert_eq!(
            patch.operations(),
            &[
                PatchOperation::Remove {
                    path: "/k/0".to_string()
                },
                PatchOperation::Add {
                    path: "/k/2".to_string(),
                    value: json!("x"),
                },
            ]
        );
        assert_eq!(apply_patch(&left, &patch).unwrap(), right);
    }

    #[test]
    fn test_array_replaced_element_diffs_in_place() {
        let left = json!({"alts": [{"url": "https://a", "language": "de"}]});
        let right = json!({"alts": [{"url": "https://b", "language": "de"}]});

        let patch = diff(&left, &right);

        assert_eq!(
            patch.operations(),
            &[PatchOperation::Replace {
                path: "/alts/0/url".to_string(),
                value: json!("https://b"),
            }]
        );
    }

    #[test]
    fn test_array_removal_applies_to_shifted_head() {
        // Reversing a front removal keeps a later edit to another element
        let undo = diff(&json!({"k": ["b", "c"]}), &json!({"k": ["a", "b", "c"]}));
        let head = json!({"k": ["b", "C2"]});

        assert_eq!(apply_patch(&head, &undo).unwrap(), json!({"k": ["a", "b", "C2"]}));
    }

    #[test]
    fn test_engine_excludes_modified_date() {
        let engine = PatchEngine::new();
        let left = json!({"title": "Foo", "modified_date": "2024-01-01T00:00:00Z"});
        let right = json!({"title": "Foo", "modified_date": "2024-06-01T00:00:00Z"});

        assert!(engine.diff(&left, &right).is_empty());
    }

    #[test]
    fn test_replace_missing_path_conflicts() {
        let patch = Patch(vec![
            PatchOperation::Replace {
                path: "/title".to_string(),
                value: json!("ok"),
            },
            PatchOperation::Replace {
                path: "/missing".to_string(),
                value: json!(1),
            },
        ]);
        let doc = json!({"title": "Foo"});

        assert_eq!(conflict_index(apply_patch(&doc, &patch)), 1);
        // All-or-nothing: the first replace was not kept anywhere
        assert_eq!(doc, json!({"title": "Foo"}));
    }

    #[test]
    fn test_add_existing_member_conflicts() {
        let patch = Patch(vec![PatchOperation::Add {
            path: "/title".to_string(),
            value: json!("Bar"),
        }]);

        assert_eq!(conflict_index(apply_patch(&json!({"title": "Foo"}), &patch)), 0);
    }

    #[test]
    fn test_array_bounds() {
        let doc = json!({"k": ["a"]});

        let add_past_end = Patch(vec![PatchOperation::Add {
            path: "/k/2".to_string(),
            value: json!("c"),
        }]);
        assert!(apply_patch(&doc, &add_past_end).is_err());

        let append = Patch(vec![PatchOperation::Add {
            path: "/k/-".to_string(),
            value: json!("b"),
        }]);
        assert_eq!(apply_patch(&doc, &append).unwrap(), json!({"k": ["a", "b"]}));

        let remove_missing = Patch(vec![PatchOperation::Remove {
            path: "/k/1".to_string(),
        }]);
        assert!(apply_patch(&doc, &remove_missing).is_err());

        let leading_zero = Patch(vec![PatchOperation::Remove {
            path: "/k/00".to_string(),
        }]);
        assert!(apply_patch(&doc, &leading_zero).is_err());
    }

    #[test]
    fn test_move_copy_test() {
        let doc = json!({"a": {"x": 1}, "b": [1, 2]});

        let patch = Patch(vec![
            PatchOperation::Test {
                path: "/a/x".to_string(),
                value: json!(1),
            },
            PatchOperation::Copy {
                from: "/a".to_string(),
                path: "/c".to_string(),
            },
            PatchOperation::Move {
                from: "/b/0".to_string(),
                path: "/b/-".to_string(),
            },
        ]);

        let applied = apply_patch(&doc, &patch).unwrap();
        assert_eq!(applied, json!({"a": {"x": 1}, "b": [2, 1], "c": {"x": 1}}));
    }

    #[test]
    fn test_failed_test_op_conflicts() {
        let patch = Patch(vec![PatchOperation::Test {
            path: "/title".to_string(),
            value: json!("Other"),
        }]);

        assert!(apply_patch(&json!({"title": "Foo"}), &patch).is_err());
    }

    #[test]
    fn test_move_into_own_child_conflicts() {
        let patch = Patch(vec![PatchOperation::Move {
            from: "/a".to_string(),
            path: "/a/inner".to_string(),
        }]);

        assert!(apply_patch(&json!({"a": {}}), &patch).is_err());
    }

    #[test]
    fn test_malformed_pointer_conflicts() {
        for path in ["title", "/bad~2escape"] {
            let patch = Patch(vec![PatchOperation::Replace {
                path: path.to_string(),
                value: json!(1),
            }]);
            assert!(apply_patch(&json!({"title": 0}), &patch).is_err(), "{}", path);
        }
    }

    #[test]
    fn test_root_replace() {
        let patch = diff(&json!(1), &json!({"a": 1}));
        assert_eq!(patch.operations()[0].path(), "");
        assert_eq!(apply_patch(&json!(1), &patch).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_escaped_keys() {
        let left = json!({});
        let right = json!({"a/b": 1, "m~n": 2});

        let patch = diff(&left, &right);
        let paths: Vec<&str> = patch.iter().map(|op| op.path()).collect();
        assert_eq!(paths, vec!["/a~1b", "/m~0n"]);
        assert_eq!(apply_patch(&left, &patch).unwrap(), right);
    }
}
