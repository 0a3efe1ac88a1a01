//! `{{name}}` argument placeholders in commands and hooks.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use ablator_utils::directive::is_directive;
use ablator_utils::types::{AblationDefinition, Hook};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_-]*)\s*\}\}").expect("placeholder pattern is valid")
});

/// Placeholder names used in `text`, in first-seen order without duplicates.
#[must_use]
pub fn extract_placeholders(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    PLACEHOLDER
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Replace every placeholder that has a value. Unknown placeholders stay verbatim.
#[must_use]
pub fn substitute(text: &str, values: &BTreeMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = caps.get(1).map_or("", |m| m.as_str());
            values
                .get(name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Whether position `at` of `text` lies inside a JSON string literal.
fn inside_json_string(text: &str, at: usize) -> bool {
    let mut inside = false;
    let mut escaped = false;
    for ch in text[..at].chars() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if inside => escaped = true,
            '"' => inside = !inside,
            _ => {}
        }
    }
    inside
}

/// `value` escaped for use between the quotes of a JSON string.
fn escape_json_string(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Like [`substitute`] for `@tool` directives: a placeholder inside a JSON
/// string literal receives the JSON-escaped value, one outside a string
/// receives the raw value (numbers, booleans).
#[must_use]
pub fn substitute_directive(text: &str, values: &BTreeMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let Some(whole) = caps.get(0) else {
                return String::new();
            };
            let name = caps.get(1).map_or("", |m| m.as_str());
            match values.get(name) {
                Some(value) if inside_json_string(text, whole.start()) => {
                    escape_json_string(value)
                }
                Some(value) => value.clone(),
                None => whole.as_str().to_string(),
            }
        })
        .into_owned()
}

/// Substitute into a command string, JSON-aware for directives.
#[must_use]
pub fn substitute_command(text: &str, values: &BTreeMap<String, String>) -> String {
    if is_directive(text) {
        substitute_directive(text, values)
    } else {
        substitute(text, values)
    }
}

/// `text` with every placeholder replaced by `0`, which is valid JSON both
/// inside and outside string literals. Used to check directive syntax before
/// argument values are known.
#[must_use]
pub fn with_stand_ins(text: &str) -> String {
    let stand_ins: BTreeMap<String, String> = extract_placeholders(text)
        .into_iter()
        .map(|name| (name, "0".to_string()))
        .collect();
    substitute_directive(text, &stand_ins)
}

/// Mismatch between placeholders in use and declared arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderWarning {
    /// `{{name}}` is used but no argument declares it
    Undeclared { name: String },
    /// An argument is declared but never used
    Unused { name: String },
}

impl fmt::Display for PlaceholderWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undeclared { name } => {
                write!(f, "placeholder '{{{{{name}}}}}' has no argument definition")
            }
            Self::Unused { name } => write!(f, "argument '{name}' is never used"),
        }
    }
}

fn hook_texts(hooks: &[Hook]) -> impl Iterator<Item = &str> {
    hooks.iter().map(|hook| hook.run.as_str())
}

/// Every string of `definition` that placeholders may appear in.
fn templated_texts(definition: &AblationDefinition) -> Vec<&str> {
    let mut texts: Vec<&str> = hook_texts(&definition.hooks).collect();
    for phase in &definition.phases {
        texts.extend(phase.on_start.iter().map(String::as_str));
        texts.extend(phase.commands.iter().map(String::as_str));
        texts.extend(phase.on_end.iter().map(String::as_str));
        texts.extend(hook_texts(&phase.hooks));
    }
    texts
}

/// Compare placeholders used against declared arguments.
#[must_use]
pub fn validate_placeholders(definition: &AblationDefinition) -> Vec<PlaceholderWarning> {
    let used: BTreeSet<String> = templated_texts(definition)
        .into_iter()
        .flat_map(extract_placeholders)
        .collect();
    let declared: BTreeSet<String> = definition
        .arguments
        .iter()
        .map(|arg| arg.name.clone())
        .collect();

    let undeclared = used
        .difference(&declared)
        .map(|name| PlaceholderWarning::Undeclared { name: name.clone() });
    let unused = declared
        .difference(&used)
        .map(|name| PlaceholderWarning::Unused { name: name.clone() });
    undeclared.chain(unused).collect()
}

fn substitute_all(texts: &mut [String], values: &BTreeMap<String, String>) {
    for text in texts {
        *text = substitute_command(text, values);
    }
}

fn substitute_hooks(hooks: &mut [Hook], values: &BTreeMap<String, String>) {
    for hook in hooks {
        hook.run = substitute_directive(&hook.run, values);
    }
}

/// A copy of `definition` with argument values substituted into commands,
/// `onStart`/`onEnd` and hook `run` directives.
#[must_use]
pub fn apply_arguments(
    definition: &AblationDefinition,
    values: &BTreeMap<String, String>,
) -> AblationDefinition {
    let mut resolved = definition.clone();
    substitute_hooks(&mut resolved.hooks, values);
    for phase in &mut resolved.phases {
        substitute_all(&mut phase.on_start, values);
        substitute_all(&mut phase.commands, values);
        substitute_all(&mut phase.on_end, values);
        substitute_hooks(&mut phase.hooks, values);
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use ablator_utils::types::{ArgumentDefinition, ArgumentType, Phase};
    use proptest::prelude::*;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn argument(name: &str) -> ArgumentDefinition {
        ArgumentDefinition {
            name: name.to_string(),
            kind: ArgumentType::String,
            description: None,
            required: false,
            default: None,
        }
    }

    #[test]
    fn test_extract_placeholders() {
        assert_eq!(
            extract_placeholders("search {{topic}} in {{ lang }} then {{topic}}"),
            vec!["topic", "lang"]
        );
        assert!(extract_placeholders("{{}} {{1bad}} {single}").is_empty());
    }

    #[test]
    fn test_substitute_partial() {
        let text = r#"@tool search {"q": "{{topic}}", "limit": {{limit}}}"#;
        assert_eq!(
            substitute(text, &values(&[("topic", "rust")])),
            r#"@tool search {"q": "rust", "limit": {{limit}}}"#
        );
    }

    #[test]
    fn test_validate_placeholders() {
        let mut def = AblationDefinition::new("demo");
        def.arguments = vec![argument("topic"), argument("unused")];
        def.phases = vec![
            Phase::new("p1").with_commands(["Summarise {{topic}}", "Cite {{source}}"]),
        ];
        def.hooks = vec![Hook::after("search", "@tool log {\"t\": \"{{topic}}\"}")];

        assert_eq!(
            validate_placeholders(&def),
            vec![
                PlaceholderWarning::Undeclared {
                    name: "source".into()
                },
                PlaceholderWarning::Unused {
                    name: "unused".into()
                },
            ]
        );
    }

    #[test]
    fn test_apply_arguments_everywhere() {
        let mut phase = Phase::new("p").with_commands(["{{a}}"]);
        phase.on_start = vec!["start {{a}}".into()];
        phase.on_end = vec!["end {{b}}".into()];
        phase.hooks = vec![Hook::before("x", "@tool y {\"v\": \"{{a}}\"}")];
        let mut def = AblationDefinition::new("demo");
        def.phases = vec![phase];
        def.hooks = vec![Hook::after("x", "@tool z {\"v\": \"{{b}}\"}")];

        let resolved = apply_arguments(&def, &values(&[("a", "1"), ("b", "2")]));
        let phase = &resolved.phases[0];
        assert_eq!(phase.commands, vec!["1"]);
        assert_eq!(phase.on_start, vec!["start 1"]);
        assert_eq!(phase.on_end, vec!["end 2"]);
        assert_eq!(phase.hooks[0].run, "@tool y {\"v\": \"1\"}");
        assert_eq!(resolved.hooks[0].run, "@tool z {\"v\": \"2\"}");
        // The original is untouched
        assert_eq!(def.phases[0].commands, vec!["{{a}}"]);
    }

    #[test]
    fn test_directive_values_are_json_escaped() {
        let text = r#"@tool echo {"q": "{{topic}}", "n": {{count}}}"#;
        let out = substitute_directive(
            text,
            &values(&[("topic", "say \"hi\" \\ now\nplease"), ("count", "3")]),
        );
        let directive = ablator_utils::directive::parse_directive(&out).unwrap();
        assert_eq!(
            directive.args,
            serde_json::json!({"q": "say \"hi\" \\ now\nplease", "n": 3})
        );
    }

    #[test]
    fn test_escaped_quote_does_not_end_string() {
        let text = r#"@tool echo {"q": "a \" {{x}}"}"#;
        assert_eq!(
            substitute_directive(text, &values(&[("x", "\"")])),
            r#"@tool echo {"q": "a \" \""}"#
        );
    }

    #[test]
    fn test_queries_keep_raw_values() {
        assert_eq!(
            substitute_command("Explain \"{{topic}}\"", &values(&[("topic", "a\"b")])),
            "Explain \"a\"b\""
        );
    }

    #[test]
    fn test_stand_ins_make_templated_json_parse() {
        let text = r#"@tool echo {"q": "{{topic}}", "n": {{count}}}"#;
        let directive = ablator_utils::directive::parse_directive(&with_stand_ins(text)).unwrap();
        assert_eq!(directive.args, serde_json::json!({"q": "0", "n": 0}));
    }

    fn name_strategy() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,8}"
    }

    proptest! {
        #[test]
        fn prop_full_substitution_leaves_no_placeholders(
            names in prop::collection::btree_set(name_strategy(), 1..5),
            filler in "[a-z ]{0,10}",
        ) {
            let text: String = names
                .iter()
                .map(|n| format!("{filler}{{{{{n}}}}}"))
                .collect();
            let all: BTreeMap<String, String> =
                names.iter().map(|n| (n.clone(), "value".to_string())).collect();
            let out = substitute(&text, &all);
            prop_assert!(extract_placeholders(&out).is_empty());
            prop_assert!(!out.contains("{{"));
        }

        #[test]
        fn prop_partial_substitution_keeps_unresolved(
            names in prop::collection::btree_set(name_strategy(), 2..5),
        ) {
            let text: String = names.iter().map(|n| format!("[{{{{{n}}}}}]")).collect();
            let first = names.iter().next().cloned().unwrap_or_default();
            let some: BTreeMap<String, String> =
                std::iter::once((first.clone(), "v".to_string())).collect();
            let out = substitute(&text, &some);
            for name in names.iter().filter(|n| **n != first) {
                let token = format!("{{{{{name}}}}}");
                prop_assert!(out.contains(&token));
            }
            let first_token = format!("{{{{{first}}}}}");
            prop_assert!(!out.contains(&first_token));
        }
    }
}
