//! JSON helpers for SCIM resources
//!
//! SCIM attribute names are case-insensitive (RFC 7643 §2.1), so every
//! object access here folds case. Writes normalize keys to the canonical
//! SCIM casing so stored payloads stay predictable.

use serde_json::{Map, Value};

/// Canonical casings for well-known SCIM attribute names. Lookup is by
/// lowercased name; unknown names pass through unchanged.
const CANONICAL_ATTRS: &[(&str, &str)] = &[
    ("username", "userName"),
    ("externalid", "externalId"),
    ("displayname", "displayName"),
    ("nickname", "nickName"),
    ("profileurl", "profileUrl"),
    ("usertype", "userType"),
    ("preferredlanguage", "preferredLanguage"),
    ("phonenumbers", "phoneNumbers"),
    ("givenname", "givenName"),
    ("familyname", "familyName"),
    ("middlename", "middleName"),
    ("honorificprefix", "honorificPrefix"),
    ("honorificsuffix", "honorificSuffix"),
    ("employeenumber", "employeeNumber"),
    ("costcenter", "costCenter"),
    ("streetaddress", "streetAddress"),
    ("postalcode", "postalCode"),
    ("ims", "ims"),
    ("x509certificates", "x509Certificates"),
    ("entitlements", "entitlements"),
];

pub fn canonical_attr(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    for (l, canonical) in CANONICAL_ATTRS {
        if *l == lower {
            return (*canonical).to_string();
        }
    }
    name.to_string()
}

/// Case-insensitive object key lookup.
pub fn get_ci<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.as_object().and_then(|obj| {
        obj.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

pub fn get_ci_mut<'a>(value: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    value.as_object_mut().and_then(|obj| {
        let found = obj.keys().find(|k| k.eq_ignore_ascii_case(key)).cloned();
        found.and_then(move |k| obj.get_mut(&k))
    })
}

/// Remove a key regardless of casing, returning the removed value.
pub fn remove_ci(value: &mut Value, key: &str) -> Option<Value> {
    value.as_object_mut().and_then(|obj| {
        let found = obj.keys().find(|k| k.eq_ignore_ascii_case(key)).cloned();
        found.and_then(|k| obj.remove(&k))
    })
}

/// Set a key under its canonical casing, dropping any other-cased twin.
pub fn set_ci(value: &mut Value, key: &str, new: Value) {
    let canonical = canonical_attr(key);
    if let Some(obj) = value.as_object_mut() {
        let stale: Vec<String> = obj
            .keys()
            .filter(|k| k.eq_ignore_ascii_case(&canonical) && **k != canonical)
            .cloned()
            .collect();
        for k in stale {
            obj.remove(&k);
        }
        obj.insert(canonical, new);
    }
}

/// Strip keys (case-insensitive) from an object in place.
pub fn strip_keys(value: &mut Value, keys: &[&str]) {
    if let Some(obj) = value.as_object_mut() {
        let doomed: Vec<String> = obj
            .keys()
            .filter(|k| keys.iter().any(|key| k.eq_ignore_ascii_case(key)))
            .cloned()
            .collect();
        for k in doomed {
            obj.remove(&k);
        }
    }
}

/// Recursively coerce the strings `"True"`/`"False"` (any casing) to
/// booleans. Entra sends stringly-typed booleans on both ingest and
/// PATCH payloads.
pub fn coerce_booleans(value: &mut Value) {
    match value {
        Value::String(s) => {
            let coerced = if s.eq_ignore_ascii_case("true") {
                Some(true)
            } else if s.eq_ignore_ascii_case("false") {
                Some(false)
            } else {
                None
            };
            if let Some(b) = coerced {
                *value = Value::Bool(b);
            }
        }
        Value::Array(items) => {
            for item in items {
                coerce_booleans(item);
            }
        }
        Value::Object(obj) => {
            for (_, v) in obj.iter_mut() {
                coerce_booleans(v);
            }
        }
        _ => {}
    }
}

/// Resolve a possibly-dotted attribute path (`name.givenName`) against a
/// resource, case-insensitively. Arrays fan out; for complex multi-valued
/// attributes without a sub-attribute the conventional `value` field is
/// used as the comparable.
pub fn collect_values<'a>(resource: &'a Value, attr: &str, sub: Option<&str>) -> Vec<&'a Value> {
    let Some(target) = get_ci(resource, attr) else {
        return Vec::new();
    };
    match (target, sub) {
        (Value::Array(items), Some(sub)) => {
            items.iter().filter_map(|item| get_ci(item, sub)).collect()
        }
        (Value::Array(items), None) => items
            .iter()
            .map(|item| get_ci(item, "value").unwrap_or(item))
            .collect(),
        (obj @ Value::Object(_), Some(sub)) => get_ci(obj, sub).into_iter().collect(),
        (scalar, None) => vec![scalar],
        (_, Some(_)) => Vec::new(),
    }
}

/// Deep-merge `patch` into `base`: objects merge key-wise, everything
/// else replaces.
pub fn merge_objects(base: &mut Value, patch: &Map<String, Value>) {
    for (k, v) in patch {
        match (get_ci_mut(base, k), v) {
            (Some(existing @ Value::Object(_)), Value::Object(sub)) => {
                merge_objects(existing, sub);
            }
            _ => set_ci(base, k, v.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_ci() {
        let v = json!({"userName": "alice"});
        assert_eq!(get_ci(&v, "USERNAME").unwrap(), "alice");
        assert_eq!(get_ci(&v, "username").unwrap(), "alice");
        assert!(get_ci(&v, "other").is_none());
    }

    #[test]
    fn test_set_ci_canonicalizes_and_dedupes() {
        let mut v = json!({"USERNAME": "old"});
        set_ci(&mut v, "username", json!("new"));
        assert_eq!(v, json!({"userName": "new"}));
    }

    #[test]
    fn test_remove_ci() {
        let mut v = json!({"ExternalId": "x-1", "keep": 1});
        assert_eq!(remove_ci(&mut v, "externalid"), Some(json!("x-1")));
        assert_eq!(v, json!({"keep": 1}));
    }

    #[test]
    fn test_strip_keys() {
        let mut v = json!({"id": "nope", "ID2": 1, "userName": "a", "Active": true});
        strip_keys(&mut v, &["id", "active"]);
        assert_eq!(v, json!({"ID2": 1, "userName": "a"}));
    }

    #[test]
    fn test_coerce_booleans_recursive() {
        let mut v = json!({
            "active": "True",
            "nested": {"flag": "FALSE", "label": "Truthful"},
            "list": [{"primary": "true"}]
        });
        coerce_booleans(&mut v);
        assert_eq!(v["active"], json!(true));
        assert_eq!(v["nested"]["flag"], json!(false));
        assert_eq!(v["nested"]["label"], json!("Truthful"));
        assert_eq!(v["list"][0]["primary"], json!(true));
    }

    #[test]
    fn test_collect_values_scalar_and_nested() {
        let v = json!({"userName": "alice", "name": {"givenName": "Alice"}});
        assert_eq!(collect_values(&v, "username", None), vec![&json!("alice")]);
        assert_eq!(
            collect_values(&v, "name", Some("givenname")),
            vec![&json!("Alice")]
        );
        assert!(collect_values(&v, "missing", None).is_empty());
    }

    #[test]
    fn test_collect_values_multivalued_defaults_to_value() {
        let v = json!({"emails": [
            {"type": "work", "value": "a@x.com"},
            {"type": "home", "value": "b@x.com"}
        ]});
        let values = collect_values(&v, "emails", None);
        assert_eq!(values, vec![&json!("a@x.com"), &json!("b@x.com")]);
        let typed = collect_values(&v, "emails", Some("type"));
        assert_eq!(typed, vec![&json!("work"), &json!("home")]);
    }

    #[test]
    fn test_canonical_attr() {
        assert_eq!(canonical_attr("USERNAME"), "userName");
        assert_eq!(canonical_attr("displayname"), "displayName");
        assert_eq!(canonical_attr("customAttr"), "customAttr");
    }

    #[test]
    fn test_merge_objects_deep() {
        let mut base = json!({"name": {"givenName": "A", "familyName": "B"}, "x": 1});
        let patch = json!({"name": {"givenName": "Z"}, "y": 2});
        merge_objects(&mut base, patch.as_object().unwrap());
        assert_eq!(base["name"]["givenName"], "Z");
        assert_eq!(base["name"]["familyName"], "B");
        assert_eq!(base["y"], 2);
    }
}
