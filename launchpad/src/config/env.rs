//! `${NAME}` placeholder resolution over raw YAML values

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_yaml::Value;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid"));

/// Resolve placeholders against the process environment
pub fn interpolate(value: &mut Value) {
    interpolate_with(value, &|name| std::env::var(name).ok());
}

/// Resolve every `${NAME}` inside string values, recursing through mappings,
/// sequences and tagged values. Unknown variables resolve to the empty string.
pub fn interpolate_with(value: &mut Value, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        Value::String(s) => {
            if s.contains("${") {
                *s = substitute(s, lookup);
            }
        }
        Value::Sequence(items) => {
            for item in items.iter_mut() {
                interpolate_with(item, lookup);
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                interpolate_with(item, lookup);
            }
        }
        Value::Tagged(tagged) => interpolate_with(&mut tagged.value, lookup),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn substitute(input: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    PLACEHOLDER
        .replace_all(input, |caps: &Captures| lookup(&caps[1]).unwrap_or_default())
        .into_owned()
}
