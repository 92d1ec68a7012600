//! Attribute projection for GET and `.search`
//!
//! `attributes` keeps the listed attributes, `excludedAttributes` drops
//! the listed ones; `id`, `schemas` and `meta` are always returned. When
//! both parameters name the same attribute, exclusion wins.

use serde_json::Value;

const ALWAYS_RETURNED: &[&str] = &["id", "schemas", "meta"];

/// Split a comma-separated query parameter into attribute names.
pub fn parse_attr_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Apply projection to a serialized resource, in place.
pub fn apply_projection(
    resource: &mut Value,
    attributes: Option<&[String]>,
    excluded: Option<&[String]>,
) {
    let Some(obj) = resource.as_object_mut() else {
        return;
    };

    // Projection operates on top-level attributes; a sub-attribute
    // request (`name.givenName`) keeps its parent.
    let top = |name: &str| -> String {
        name.split('.').next().unwrap_or(name).to_ascii_lowercase()
    };

    if let Some(attrs) = attributes {
        let keep: Vec<String> = attrs.iter().map(|a| top(a)).collect();
        let doomed: Vec<String> = obj
            .keys()
            .filter(|k| {
                let kl = k.to_ascii_lowercase();
                !ALWAYS_RETURNED.contains(&kl.as_str()) && !keep.contains(&kl)
            })
            .cloned()
            .collect();
        for k in doomed {
            obj.remove(&k);
        }
    }

    if let Some(excluded) = excluded {
        let drop: Vec<String> = excluded.iter().map(|a| top(a)).collect();
        let doomed: Vec<String> = obj
            .keys()
            .filter(|k| {
                let kl = k.to_ascii_lowercase();
                !ALWAYS_RETURNED.contains(&kl.as_str()) && drop.contains(&kl)
            })
            .cloned()
            .collect();
        for k in doomed {
            obj.remove(&k);
        }
    }
}
