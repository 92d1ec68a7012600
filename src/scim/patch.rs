//! SCIM PATCH path resolver and applier (RFC 7644 §3.5.2)
//!
//! Paths parse into a typed shape and each op dispatches on the variant.
//! Entra compatibility notes:
//! - dot-notation (`name.givenName`) resolves into nested objects only
//!   when the endpoint opts in via `VerbosePatchSupported`; otherwise the
//!   dotted key is stored verbatim as a flat attribute,
//! - `replace` with `{"value": ""}` nulls the target attribute,
//! - stringly-typed booleans are coerced by the caller after all ops.

use crate::domain::scim::PatchOperation;
use crate::error::{AppError, Result};
use crate::scim::filter::{self, FilterExpr, FilterValue};
use crate::scim::value::{canonical_attr, get_ci, get_ci_mut, merge_objects, remove_ci, set_ci};
use serde_json::{json, Map, Value};

/// Parsed PATCH path shape
#[derive(Debug, Clone)]
pub enum PatchPath {
    /// Top-level attribute (canonical name, or a verbatim flat key when
    /// dot-notation is disabled)
    Simple(String),
    /// `name.givenName` with `VerbosePatchSupported = true`
    Dot { parent: String, sub: String },
    /// `urn:...:2.0:User:manager`: attribute inside an extension namespace
    Extension {
        urn: String,
        attr: String,
        sub: Option<String>,
    },
    /// `emails[type eq "work"].value`
    ValuePath {
        attr: String,
        filter: FilterExpr,
        sub: Option<String>,
    },
}

/// Behavior toggles taken from the endpoint config.
#[derive(Debug, Clone, Copy)]
pub struct PatchFlags {
    pub verbose_dot: bool,
}

/// Parse a PATCH `path` string.
pub fn parse_path(path: &str, flags: &PatchFlags) -> Result<PatchPath> {
    let path = path.trim();
    if path.is_empty() {
        return Err(AppError::InvalidPath("Empty PATCH path".to_string()));
    }

    // valuePath: attr[filter] or attr[filter].sub
    if let Some(open) = path.find('[') {
        let close = path
            .rfind(']')
            .ok_or_else(|| AppError::InvalidPath(format!("Unclosed valuePath in '{}'", path)))?;
        if close < open {
            return Err(AppError::InvalidPath(format!("Malformed valuePath '{}'", path)));
        }
        let attr = canonical_attr(&path[..open]);
        let inner = &path[open + 1..close];
        let filter = filter::parse_filter(inner)
            .map_err(|e| AppError::InvalidPath(format!("Bad valuePath filter: {}", e.detail())))?;
        let rest = &path[close + 1..];
        let sub = match rest.strip_prefix('.') {
            Some(s) if !s.is_empty() => Some(canonical_attr(s)),
            Some(_) => {
                return Err(AppError::InvalidPath(format!(
                    "Trailing '.' in PATCH path '{}'",
                    path
                )))
            }
            None if rest.is_empty() => None,
            None => {
                return Err(AppError::InvalidPath(format!(
                    "Unexpected text after valuePath in '{}'",
                    path
                )))
            }
        };
        return Ok(PatchPath::ValuePath { attr, filter, sub });
    }

    // Extension URN: the attribute is the segment after the last ':'.
    if path.to_ascii_lowercase().starts_with("urn:") {
        let idx = path.rfind(':').unwrap();
        let (urn, attr_part) = (path[..idx].to_string(), &path[idx + 1..]);
        if attr_part.is_empty() {
            return Err(AppError::InvalidPath(format!(
                "Extension path '{}' names no attribute",
                path
            )));
        }
        let (attr, sub) = match attr_part.split_once('.') {
            Some((a, s)) => (canonical_attr(a), Some(canonical_attr(s))),
            None => (canonical_attr(attr_part), None),
        };
        return Ok(PatchPath::Extension { urn, attr, sub });
    }

    if let Some((parent, sub)) = path.split_once('.') {
        if flags.verbose_dot {
            return Ok(PatchPath::Dot {
                parent: canonical_attr(parent),
                sub: canonical_attr(sub),
            });
        }
        // Entra-compatible fallback: dotted key stored verbatim.
        return Ok(PatchPath::Simple(path.to_string()));
    }

    Ok(PatchPath::Simple(canonical_attr(path)))
}

/// Apply a sequence of operations in array order; later operations see
/// earlier effects.
pub fn apply_operations(
    resource: &mut Value,
    ops: &[PatchOperation],
    flags: &PatchFlags,
) -> Result<()> {
    for op in ops {
        apply_operation(resource, op, flags)?;
    }
    Ok(())
}

/// Apply one operation to a resource object.
pub fn apply_operation(resource: &mut Value, op: &PatchOperation, flags: &PatchFlags) -> Result<()> {
    match op.op.to_ascii_lowercase().as_str() {
        "add" | "replace" => {
            let is_add = op.op.eq_ignore_ascii_case("add");
            let value = op
                .value
                .clone()
                .ok_or_else(|| AppError::InvalidValue(format!("'{}' requires a value", op.op)))?;
            match &op.path {
                None => merge_no_path(resource, value, flags),
                Some(path) => {
                    let parsed = parse_path(path, flags)?;
                    apply_set(resource, &parsed, value, is_add)
                }
            }
        }
        "remove" => {
            let path = op.path.as_deref().ok_or_else(|| {
                AppError::NoTarget("remove operation requires a path".to_string())
            })?;
            let parsed = parse_path(path, flags)?;
            apply_remove(resource, &parsed);
            Ok(())
        }
        other => Err(AppError::InvalidValue(format!(
            "Unknown PATCH op '{}'",
            other
        ))),
    }
}

/// No-path add/replace: operand keys merge into the resource. Dotted and
/// URN-prefixed keys route to nested objects; server-managed fields are
/// dropped.
fn merge_no_path(resource: &mut Value, value: Value, flags: &PatchFlags) -> Result<()> {
    let Value::Object(map) = value else {
        return Err(AppError::InvalidValue(
            "PATCH without a path requires an object value".to_string(),
        ));
    };
    for (key, v) in map {
        if key.eq_ignore_ascii_case("id") || key.eq_ignore_ascii_case("meta") {
            continue;
        }
        if key.to_ascii_lowercase().starts_with("urn:") && key.rfind(':').is_some() {
            let parsed = parse_path(&key, flags)?;
            apply_set(resource, &parsed, v, false)?;
        } else if key.contains('.') {
            if flags.verbose_dot {
                let parsed = parse_path(&key, flags)?;
                apply_set(resource, &parsed, v, false)?;
            } else {
                // Verbatim flat key, Entra style.
                if let Some(obj) = resource.as_object_mut() {
                    obj.insert(key, v);
                }
            }
        } else if let (Some(existing @ Value::Object(_)), Value::Object(sub)) =
            (get_ci_mut(resource, &key), &v)
        {
            merge_objects(existing, sub);
        } else {
            set_ci(resource, &key, v);
        }
    }
    Ok(())
}

/// RFC 7644 §3.5.2.3: replacing a complex value with `{"value": ""}`
/// removes the attribute.
fn is_empty_string_nulling(value: &Value) -> bool {
    value
        .as_object()
        .map(|obj| obj.len() == 1 && matches!(get_ci(value, "value"), Some(Value::String(s)) if s.is_empty()))
        .unwrap_or(false)
}

fn apply_set(resource: &mut Value, path: &PatchPath, value: Value, is_add: bool) -> Result<()> {
    if !is_add && is_empty_string_nulling(&value) {
        apply_remove(resource, path);
        return Ok(());
    }

    match path {
        PatchPath::Simple(name) => {
            if is_add {
                if let Some(existing) = get_ci_mut(resource, name) {
                    if let Value::Array(items) = existing {
                        match value {
                            Value::Array(new_items) => items.extend(new_items),
                            other => items.push(other),
                        }
                        return Ok(());
                    }
                }
            }
            set_ci(resource, name, value);
            Ok(())
        }
        PatchPath::Dot { parent, sub } => {
            let target = ensure_object(resource, parent);
            set_ci(target, sub, value);
            Ok(())
        }
        PatchPath::Extension { urn, attr, sub } => {
            let ext = ensure_object(resource, urn);
            match sub {
                Some(sub) => {
                    let nested = ensure_object(ext, attr);
                    set_ci(nested, sub, value);
                }
                None => set_ci(ext, attr, value),
            }
            Ok(())
        }
        PatchPath::ValuePath { attr, filter, sub } => {
            apply_value_path_set(resource, attr, filter, sub.as_deref(), value, is_add)
        }
    }
}

fn apply_value_path_set(
    resource: &mut Value,
    attr: &str,
    filter: &FilterExpr,
    sub: Option<&str>,
    value: Value,
    is_add: bool,
) -> Result<()> {
    if get_ci(resource, attr).is_none() {
        if !is_add {
            return Err(AppError::NoTarget(format!(
                "No existing values of '{}' match the PATCH path filter",
                attr
            )));
        }
        set_ci(resource, attr, Value::Array(Vec::new()));
    }

    let Some(Value::Array(items)) = get_ci_mut(resource, attr) else {
        return Err(AppError::InvalidPath(format!(
            "'{}' is not a multi-valued attribute",
            attr
        )));
    };

    let mut matched = false;
    for item in items.iter_mut() {
        if filter::matches(filter, item) {
            matched = true;
            match sub {
                Some(sub) => set_ci(item, sub, value.clone()),
                None => {
                    if let (true, Value::Object(patch)) = (item.is_object(), &value) {
                        merge_objects(item, patch);
                    } else {
                        *item = value.clone();
                    }
                }
            }
        }
    }

    if !matched {
        if !is_add {
            return Err(AppError::NoTarget(format!(
                "No existing values of '{}' match the PATCH path filter",
                attr
            )));
        }
        // Build the element from the filter's eq constraints plus the value.
        let mut element = Value::Object(Map::new());
        seed_from_filter(&mut element, filter);
        match sub {
            Some(sub) => set_ci(&mut element, sub, value),
            None => match value {
                Value::Object(patch) => merge_objects(&mut element, &patch),
                other => element = other,
            },
        }
        if let Some(Value::Array(items)) = get_ci_mut(resource, attr) {
            items.push(element);
        }
    }
    Ok(())
}

/// Seed a fresh array element with the `eq` constraints of the valuePath
/// filter so `add emails[type eq "work"].value` produces a work email.
fn seed_from_filter(element: &mut Value, filter: &FilterExpr) {
    match filter {
        FilterExpr::Compare {
            attr,
            op: filter::CompareOp::Eq,
            value,
        } => {
            let v = match value {
                FilterValue::Str(s) => json!(s),
                FilterValue::Num(n) => json!(n),
                FilterValue::Bool(b) => json!(b),
                FilterValue::Null => Value::Null,
            };
            set_ci(element, &attr.attr, v);
        }
        FilterExpr::And(l, r) => {
            seed_from_filter(element, l);
            seed_from_filter(element, r);
        }
        _ => {}
    }
}

fn apply_remove(resource: &mut Value, path: &PatchPath) {
    match path {
        PatchPath::Simple(name) => {
            remove_ci(resource, name);
        }
        PatchPath::Dot { parent, sub } => {
            if let Some(target) = get_ci_mut(resource, parent) {
                remove_ci(target, sub);
            }
        }
        PatchPath::Extension { urn, attr, sub } => {
            if let Some(ext) = get_ci_mut(resource, urn) {
                match sub {
                    Some(sub) => {
                        if let Some(nested) = get_ci_mut(ext, attr) {
                            remove_ci(nested, sub);
                        }
                    }
                    None => {
                        remove_ci(ext, attr);
                    }
                }
            }
        }
        PatchPath::ValuePath { attr, filter, sub } => {
            if let Some(Value::Array(items)) = get_ci_mut(resource, attr) {
                match sub {
                    Some(sub) => {
                        for item in items.iter_mut() {
                            if filter::matches(filter, item) {
                                remove_ci(item, sub);
                            }
                        }
                    }
                    None => items.retain(|item| !filter::matches(filter, item)),
                }
            }
        }
    }
}

fn ensure_object<'a>(resource: &'a mut Value, key: &str) -> &'a mut Value {
    let missing = !matches!(get_ci(resource, key), Some(Value::Object(_)));
    if missing {
        set_ci(resource, key, Value::Object(Map::new()));
    }
    get_ci_mut(resource, key).expect("object was just inserted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VERBOSE: PatchFlags = PatchFlags { verbose_dot: true };
    const FLAT: PatchFlags = PatchFlags { verbose_dot: false };

    fn op(op: &str, path: Option<&str>, value: Option<Value>) -> PatchOperation {
        PatchOperation {
            op: op.to_string(),
            path: path.map(String::from),
            value,
        }
    }

    #[test]
    fn test_parse_simple_path() {
        assert!(matches!(
            parse_path("active", &FLAT).unwrap(),
            PatchPath::Simple(name) if name == "active"
        ));
        assert!(matches!(
            parse_path("USERNAME", &FLAT).unwrap(),
            PatchPath::Simple(name) if name == "userName"
        ));
    }

    #[test]
    fn test_parse_dot_path_gated_by_flag() {
        match parse_path("name.givenName", &VERBOSE).unwrap() {
            PatchPath::Dot { parent, sub } => {
                assert_eq!(parent, "name");
                assert_eq!(sub, "givenName");
            }
            other => panic!("Expected Dot, got {:?}", other),
        }
        match parse_path("name.givenName", &FLAT).unwrap() {
            PatchPath::Simple(name) => assert_eq!(name, "name.givenName"),
            other => panic!("Expected Simple, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_extension_path() {
        let path = "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User:manager";
        match parse_path(path, &FLAT).unwrap() {
            PatchPath::Extension { urn, attr, sub } => {
                assert_eq!(urn, "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User");
                assert_eq!(attr, "manager");
                assert!(sub.is_none());
            }
            other => panic!("Expected Extension, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_value_path() {
        match parse_path("emails[type eq \"work\"].value", &FLAT).unwrap() {
            PatchPath::ValuePath { attr, sub, .. } => {
                assert_eq!(attr, "emails");
                assert_eq!(sub.as_deref(), Some("value"));
            }
            other => panic!("Expected ValuePath, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_path_errors() {
        assert!(parse_path("", &FLAT).is_err());
        assert!(parse_path("emails[type eq \"work\"", &FLAT).is_err());
        assert!(parse_path("emails[type zz \"work\"]", &FLAT).is_err());
    }

    #[test]
    fn test_replace_simple() {
        let mut r = json!({"userName": "old@x.com"});
        apply_operation(
            &mut r,
            &op("replace", Some("userName"), Some(json!("new@x.com"))),
            &FLAT,
        )
        .unwrap();
        assert_eq!(r["userName"], "new@x.com");
    }

    #[test]
    fn test_replace_value_path_sub_attr() {
        let mut r = json!({"emails": [
            {"type": "work", "value": "old@x.com", "primary": true},
            {"type": "home", "value": "h@x.com"}
        ]});
        apply_operation(
            &mut r,
            &op(
                "replace",
                Some("emails[type eq \"work\"].value"),
                Some(json!("new@x.com")),
            ),
            &FLAT,
        )
        .unwrap();
        assert_eq!(
            r["emails"],
            json!([
                {"type": "work", "value": "new@x.com", "primary": true},
                {"type": "home", "value": "h@x.com"}
            ])
        );
    }

    #[test]
    fn test_replace_value_path_no_match_is_no_target() {
        let mut r = json!({"emails": [{"type": "home", "value": "h@x.com"}]});
        let err = apply_operation(
            &mut r,
            &op(
                "replace",
                Some("emails[type eq \"work\"].value"),
                Some(json!("w@x.com")),
            ),
            &FLAT,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::NoTarget(_)));
    }

    #[test]
    fn test_add_value_path_creates_element() {
        let mut r = json!({});
        apply_operation(
            &mut r,
            &op(
                "add",
                Some("emails[type eq \"work\"].value"),
                Some(json!("w@x.com")),
            ),
            &FLAT,
        )
        .unwrap();
        assert_eq!(r["emails"], json!([{"type": "work", "value": "w@x.com"}]));
    }

    #[test]
    fn test_remove_value_path_exact() {
        let mut r = json!({"members": [
            {"value": "u1"}, {"value": "u2"}
        ]});
        apply_operation(
            &mut r,
            &op("remove", Some("members[value eq \"u1\"]"), None),
            &FLAT,
        )
        .unwrap();
        assert_eq!(r["members"], json!([{"value": "u2"}]));
    }

    #[test]
    fn test_remove_without_path_is_no_target() {
        let mut r = json!({});
        let err = apply_operation(&mut r, &op("remove", None, None), &FLAT).unwrap_err();
        assert!(matches!(err, AppError::NoTarget(_)));
    }

    #[test]
    fn test_unknown_op_rejected() {
        let mut r = json!({});
        let err =
            apply_operation(&mut r, &op("merge", Some("active"), Some(json!(true))), &FLAT)
                .unwrap_err();
        assert!(matches!(err, AppError::InvalidValue(_)));
    }

    #[test]
    fn test_no_path_merge_routes_keys() {
        let mut r = json!({"name": {"familyName": "Doe"}});
        apply_operation(
            &mut r,
            &op(
                "replace",
                None,
                Some(json!({
                    "id": "client-supplied-ignored",
                    "displayName": "Alice",
                    "name.givenName": "Alice",
                    "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User:department": "Sales"
                })),
            ),
            &VERBOSE,
        )
        .unwrap();
        assert!(r.get("id").is_none());
        assert_eq!(r["displayName"], "Alice");
        assert_eq!(r["name"]["givenName"], "Alice");
        assert_eq!(r["name"]["familyName"], "Doe");
        assert_eq!(
            r["urn:ietf:params:scim:schemas:extension:enterprise:2.0:User"]["department"],
            "Sales"
        );
    }

    #[test]
    fn test_no_path_merge_flat_mode_keeps_dotted_key() {
        let mut r = json!({});
        apply_operation(
            &mut r,
            &op("replace", None, Some(json!({"name.givenName": "Alice"}))),
            &FLAT,
        )
        .unwrap();
        assert_eq!(r["name.givenName"], "Alice");
        assert!(r.get("name").is_none());
    }

    #[test]
    fn test_empty_string_value_nulls_attribute() {
        let mut r = json!({"manager": {"value": "m-1", "displayName": "Boss"}});
        apply_operation(
            &mut r,
            &op("replace", Some("manager"), Some(json!({"value": ""}))),
            &FLAT,
        )
        .unwrap();
        assert!(r.get("manager").is_none());
    }

    #[test]
    fn test_extension_path_set_and_remove() {
        let mut r = json!({});
        let path = "urn:ietf:params:scim:schemas:extension:enterprise:2.0:User:manager.value";
        apply_operation(&mut r, &op("add", Some(path), Some(json!("m-1"))), &FLAT).unwrap();
        assert_eq!(
            r["urn:ietf:params:scim:schemas:extension:enterprise:2.0:User"]["manager"]["value"],
            "m-1"
        );
        apply_operation(&mut r, &op("remove", Some(path), None), &FLAT).unwrap();
        assert_eq!(
            r["urn:ietf:params:scim:schemas:extension:enterprise:2.0:User"]["manager"],
            json!({})
        );
    }

    #[test]
    fn test_add_appends_to_existing_array() {
        let mut r = json!({"emails": [{"type": "work", "value": "a@x.com"}]});
        apply_operation(
            &mut r,
            &op(
                "add",
                Some("emails"),
                Some(json!([{"type": "home", "value": "b@x.com"}])),
            ),
            &FLAT,
        )
        .unwrap();
        assert_eq!(r["emails"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_ops_apply_in_order() {
        let mut r = json!({});
        let ops = vec![
            op("add", Some("nickName"), Some(json!("Al"))),
            op("replace", Some("nickName"), Some(json!("Ally"))),
        ];
        apply_operations(&mut r, &ops, &FLAT).unwrap();
        assert_eq!(r["nickName"], "Ally");
    }

    #[test]
    fn test_boolean_string_coercion_after_patch() {
        let mut r = json!({});
        apply_operation(&mut r, &op("replace", Some("active"), Some(json!("False"))), &FLAT)
            .unwrap();
        crate::scim::value::coerce_booleans(&mut r);
        assert_eq!(r["active"], json!(false));
    }
}
