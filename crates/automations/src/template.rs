//! `{{placeholder}}` substitution for automation messages.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value as JsonValue;

use crate::EventData;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("placeholder pattern is valid"));

/// Replace every `{{name}}` with the string form of `data[name]`, where
/// `name` is ASCII letters, digits and `_`.
///
/// Absent and `null` values render as the empty string. Text that is not a
/// well-formed placeholder (`{{ name }}`, `{{name`) is left untouched.
pub fn render_template(template: &str, data: &EventData) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            data.get(&caps[1]).map(display_value).unwrap_or_default()
        })
        .into_owned()
}

fn display_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// First `max_chars` characters of `text`, with `...` appended only when
/// something was cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn data(value: JsonValue) -> EventData {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn substitutes_known_and_blanks_unknown_placeholders() {
        let d = data(json!({"clientName": "Acme", "daysOverdue": 12}));
        assert_eq!(
            render_template("Hi {{clientName}}, {{daysOverdue}} days late. {{missing}}!", &d),
            "Hi Acme, 12 days late. !"
        );
    }

    #[test]
    fn malformed_placeholders_are_left_verbatim() {
        let d = data(json!({"name": "x"}));
        assert_eq!(render_template("{{ name }} {{name", &d), "{{ name }} {{name");
    }

    #[test]
    fn placeholder_names_are_ascii_only() {
        let d = data(json!({"café": "x", "client_2": "y"}));
        assert_eq!(render_template("{{café}} {{client_2}}", &d), "{{café}} y");
    }

    #[test]
    fn null_renders_empty_and_booleans_render_literally() {
        let d = data(json!({"a": null, "b": false}));
        assert_eq!(render_template("[{{a}}|{{b}}]", &d), "[|false]");
    }

    #[test]
    fn preview_truncates_at_one_hundred_chars() {
        let long = "x".repeat(150);
        let p = preview(&long, 100);
        assert_eq!(p.len(), 103);
        assert!(p.ends_with("..."));

        let exact = "y".repeat(100);
        assert_eq!(preview(&exact, 100), exact);
    }

    #[test]
    fn preview_counts_characters_not_bytes() {
        let text = "€".repeat(101);
        assert_eq!(preview(&text, 100), format!("{}...", "€".repeat(100)));
    }

    proptest! {
        /// Property: templates without placeholders render unchanged.
        #[test]
        fn plain_text_renders_unchanged(text in "[^{}]*") {
            prop_assert_eq!(render_template(&text, &EventData::new()), text);
        }

        /// Property: a rendered placeholder is replaced by exactly its value.
        #[test]
        fn placeholder_is_replaced_by_value(key in "[a-zA-Z_]{1,12}", value in "[^{}]{0,40}") {
            let mut d = EventData::new();
            d.insert(key.clone(), JsonValue::String(value.clone()));
            let rendered = render_template(&format!("<{{{{{key}}}}}>"), &d);
            prop_assert_eq!(rendered, format!("<{value}>"));
        }
    }
}
