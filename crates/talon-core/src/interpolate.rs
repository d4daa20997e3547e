//! Parameter interpolation against prior step outputs.
//!
//! Before dispatch, every string value in a step's parameter tree is scanned
//! for `{{previous_outputs[N]}}` tokens (N any integer, negatives index from
//! the end). Resolvable tokens are replaced with the referenced output;
//! out-of-range tokens are left verbatim so the un-interpolated value
//! surfaces at the handler layer instead of erroring here.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::domain::context::resolve_index;

fn token_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{previous_outputs\[(-?\d+)\]\}\}").expect("token pattern is valid")
    })
}

/// Interpolate every string value in a parameter map, recursively through
/// nested arrays and objects. Pure: the input map is not modified.
pub fn interpolate_parameters(
    parameters: &Map<String, Value>,
    outputs: &[String],
) -> Map<String, Value> {
    let mut resolved = parameters.clone();
    for value in resolved.values_mut() {
        interpolate_value(value, outputs);
    }
    resolved
}

fn interpolate_value(value: &mut Value, outputs: &[String]) {
    match value {
        Value::String(s) => {
            let replaced = interpolate_string(s, outputs);
            if replaced != *s {
                *s = replaced;
            }
        }
        Value::Array(items) => {
            for item in items {
                interpolate_value(item, outputs);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                interpolate_value(item, outputs);
            }
        }
        _ => {}
    }
}

fn interpolate_string(input: &str, outputs: &[String]) -> String {
    token_pattern()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            caps[1]
                .parse::<i64>()
                .ok()
                .and_then(|idx| resolve_index(outputs.len(), idx))
                .map(|i| outputs[i].clone())
                // Unresolvable index: keep the literal token.
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(value: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("headers".to_string(), value);
        map
    }

    fn outputs() -> Vec<String> {
        vec!["login-body".to_string(), "tok-123".to_string()]
    }

    #[test]
    fn test_positive_index_resolves() {
        let p = params(json!({"Authorization": "Bearer {{previous_outputs[1]}}"}));
        let resolved = interpolate_parameters(&p, &outputs());
        assert_eq!(
            resolved["headers"]["Authorization"],
            json!("Bearer tok-123")
        );
    }

    #[test]
    fn test_negative_index_resolves() {
        let p = params(json!("{{previous_outputs[-2]}}"));
        let resolved = interpolate_parameters(&p, &outputs());
        assert_eq!(resolved["headers"], json!("login-body"));
    }

    #[test]
    fn test_out_of_range_token_preserved() {
        let p = params(json!("x-{{previous_outputs[7]}}-y"));
        let resolved = interpolate_parameters(&p, &outputs());
        assert_eq!(resolved["headers"], json!("x-{{previous_outputs[7]}}-y"));
    }

    #[test]
    fn test_interpolation_idempotent_on_absent_indices() {
        let p = params(json!("{{previous_outputs[-5]}}"));
        let once = interpolate_parameters(&p, &outputs());
        let twice = interpolate_parameters(&once, &outputs());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_nested_arrays_and_objects() {
        let p = params(json!({
            "list": ["{{previous_outputs[0]}}", 42, {"deep": "{{previous_outputs[1]}}"}]
        }));
        let resolved = interpolate_parameters(&p, &outputs());
        assert_eq!(resolved["headers"]["list"][0], json!("login-body"));
        assert_eq!(resolved["headers"]["list"][1], json!(42));
        assert_eq!(resolved["headers"]["list"][2]["deep"], json!("tok-123"));
    }

    #[test]
    fn test_multiple_tokens_in_one_string() {
        let p = params(json!("{{previous_outputs[0]}}/{{previous_outputs[1]}}"));
        let resolved = interpolate_parameters(&p, &outputs());
        assert_eq!(resolved["headers"], json!("login-body/tok-123"));
    }

    #[test]
    fn test_non_string_values_untouched() {
        let p = params(json!({"timeout": 30, "json": true}));
        let resolved = interpolate_parameters(&p, &outputs());
        assert_eq!(resolved, p);
    }

    #[test]
    fn test_input_map_not_mutated() {
        let p = params(json!("{{previous_outputs[0]}}"));
        let _ = interpolate_parameters(&p, &outputs());
        assert_eq!(p["headers"], json!("{{previous_outputs[0]}}"));
    }
}
