//! Ablation definition parsing, validation and argument resolution.
//!
//! A definition is checked completely before a run starts; a run never
//! begins with an invalid definition.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use ablator_utils::directive::{is_directive, parse_directive};
use ablator_utils::error::DefinitionError;
use ablator_utils::paths::validate_name;
use ablator_utils::types::{AblationDefinition, ArgumentType, Hook, HookTiming, Phase};

use crate::placeholders::with_stand_ins;

/// Parse a definition document.
pub fn parse_definition(json: &str) -> Result<AblationDefinition, DefinitionError> {
    serde_json::from_str(json).map_err(|e| DefinitionError::Parse {
        reason: e.to_string(),
    })
}

/// Check a directive whose arguments may still hold `{{name}}` placeholders.
fn check_directive_template(raw: &str) -> Result<(), DefinitionError> {
    match parse_directive(&with_stand_ins(raw)) {
        Ok(_) => Ok(()),
        Err(DefinitionError::InvalidDirective { reason, .. }) => {
            Err(DefinitionError::InvalidDirective {
                command: raw.to_string(),
                reason,
            })
        }
        Err(e) => Err(e),
    }
}

fn phase_commands(phase: &Phase) -> impl Iterator<Item = &String> {
    phase
        .on_start
        .iter()
        .chain(&phase.commands)
        .chain(&phase.on_end)
}

/// Hooks paired with their global index: top-level first, then each phase's.
fn indexed_hooks(definition: &AblationDefinition) -> impl Iterator<Item = (usize, &Hook)> {
    definition
        .hooks
        .iter()
        .chain(definition.phases.iter().flat_map(|phase| &phase.hooks))
        .enumerate()
}

fn validate_hook(index: usize, hook: &Hook) -> Result<(), DefinitionError> {
    let invalid = |reason: &str| DefinitionError::InvalidHook {
        index,
        reason: reason.to_string(),
    };
    let (timing, tool) = hook
        .trigger()
        .ok_or_else(|| invalid("exactly one of 'before' or 'after' is required"))?;
    if tool.trim().is_empty() {
        return Err(invalid("trigger tool name is empty"));
    }
    if timing == HookTiming::Before && hook.when_output.is_some() {
        return Err(invalid("'whenOutput' is only valid on 'after' hooks"));
    }
    check_directive_template(&hook.run).map_err(|e| invalid(&e.to_string()))?;
    Ok(())
}

/// Check structure, uniqueness and every directive of `definition`.
pub fn validate_definition(definition: &AblationDefinition) -> Result<(), DefinitionError> {
    validate_name(&definition.name)?;

    if definition.phases.is_empty() {
        return Err(DefinitionError::NoPhases);
    }
    if !definition.dry_run && definition.models.is_empty() {
        return Err(DefinitionError::NoModels);
    }
    if let Some(runs) = definition.runs
        && runs == 0
    {
        return Err(DefinitionError::InvalidRuns { runs });
    }

    let mut phases = BTreeSet::new();
    for phase in &definition.phases {
        if !phases.insert(phase.name.as_str()) {
            return Err(DefinitionError::DuplicatePhase {
                name: phase.name.clone(),
            });
        }
    }

    let mut models = BTreeSet::new();
    for model in &definition.models {
        if !models.insert((model.provider.as_str(), model.model.as_str())) {
            return Err(DefinitionError::DuplicateModel {
                provider: model.provider.clone(),
                model: model.model.clone(),
            });
        }
    }

    for (index, hook) in indexed_hooks(definition) {
        validate_hook(index, hook)?;
    }
    for command in definition.phases.iter().flat_map(phase_commands) {
        if is_directive(command) {
            check_directive_template(command)?;
        } else if command.trim().is_empty() {
            return Err(DefinitionError::InvalidDirective {
                command: command.clone(),
                reason: "command is empty".to_string(),
            });
        }
    }

    Ok(())
}

/// Parse every directive of a definition whose arguments have been applied.
///
/// [`validate_definition`] tolerates placeholders inside directive JSON; this
/// is the check that the substituted text is real JSON.
pub fn validate_directives(definition: &AblationDefinition) -> Result<(), DefinitionError> {
    for (index, hook) in indexed_hooks(definition) {
        parse_directive(&hook.run).map_err(|e| DefinitionError::InvalidHook {
            index,
            reason: e.to_string(),
        })?;
    }
    for command in definition.phases.iter().flat_map(phase_commands) {
        if is_directive(command) {
            parse_directive(command)?;
        }
    }
    Ok(())
}

/// Fill in defaults and check required and attachment arguments.
///
/// Values for undeclared names are kept and logged; they may still resolve
/// literal placeholders.
pub fn resolve_arguments(
    definition: &AblationDefinition,
    provided: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, DefinitionError> {
    let mut resolved = BTreeMap::new();

    for argument in &definition.arguments {
        let value = provided
            .get(&argument.name)
            .or(argument.default.as_ref())
            .cloned();
        let Some(value) = value else {
            if argument.required {
                return Err(DefinitionError::MissingArgument {
                    name: argument.name.clone(),
                });
            }
            continue;
        };
        if argument.kind == ArgumentType::Attachment && !Path::new(&value).is_file() {
            return Err(DefinitionError::AttachmentNotFound {
                name: argument.name.clone(),
                path: value,
            });
        }
        resolved.insert(argument.name.clone(), value);
    }

    for (name, value) in provided {
        if !resolved.contains_key(name) {
            tracing::warn!(argument = %name, "Value given for an undeclared argument");
            resolved.insert(name.clone(), value.clone());
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ablator_utils::types::{ArgumentDefinition, ModelRef, Phase};
    use serde_json::json;

    fn valid() -> AblationDefinition {
        let mut def = AblationDefinition::new("search-tools");
        def.models = vec![
            ModelRef::new("openai", "gpt-4o"),
            ModelRef::new("anthropic", "claude"),
        ];
        def.phases = vec![
            Phase::new("baseline").with_commands(["Find the docs", "@tool search {\"q\": \"x\"}"]),
            Phase::new("with-hooks").with_commands(["Again"]),
        ];
        def
    }

    #[test]
    fn test_valid_definition() {
        validate_definition(&valid()).unwrap();
    }

    #[test]
    fn test_structural_errors() {
        let mut def = valid();
        def.phases.clear();
        assert_eq!(validate_definition(&def), Err(DefinitionError::NoPhases));

        let mut def = valid();
        def.models.clear();
        assert_eq!(validate_definition(&def), Err(DefinitionError::NoModels));
        def.dry_run = true;
        validate_definition(&def).unwrap();

        let mut def = valid();
        def.runs = Some(0);
        assert_eq!(
            validate_definition(&def),
            Err(DefinitionError::InvalidRuns { runs: 0 })
        );

        let mut def = valid();
        def.phases.push(Phase::new("baseline"));
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::DuplicatePhase { .. })
        ));

        let mut def = valid();
        def.models.push(ModelRef::new("openai", "gpt-4o"));
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::DuplicateModel { .. })
        ));

        let mut def = valid();
        def.name = "has spaces".into();
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_bad_directive_in_commands() {
        let mut def = valid();
        def.phases[0].commands.push("@tool search [1, 2]".into());
        assert!(matches!(
            validate_definition(&def),
            Err(DefinitionError::InvalidDirective { .. })
        ));
    }

    #[test]
    fn test_placeholders_in_directive_json() {
        let mut def = valid();
        def.phases[0]
            .commands
            .push(r#"@tool echo {"n": {{count}}, "q": "{{topic}}"}"#.into());
        def.hooks = vec![Hook::after("search", r#"@tool log {"n": {{count}}}"#)];
        validate_definition(&def).unwrap();

        // Unfilled, the directive is not JSON
        assert!(matches!(
            validate_directives(&def),
            Err(DefinitionError::InvalidHook { index: 0, .. })
        ));

        let mut values = BTreeMap::new();
        values.insert("count".to_string(), "3".to_string());
        values.insert("topic".to_string(), "rust".to_string());
        let resolved = crate::placeholders::apply_arguments(&def, &values);
        validate_directives(&resolved).unwrap();
        let directive = parse_directive(resolved.phases[0].commands.last().unwrap()).unwrap();
        assert_eq!(directive.args, json!({"n": 3, "q": "rust"}));
    }

    #[test]
    fn test_template_errors_name_the_original_command() {
        let mut def = valid();
        def.phases[0].commands.push("@tool search {{{q}}: 1}".into());
        let err = validate_definition(&def).unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::InvalidDirective { ref command, .. } if command == "@tool search {{{q}}: 1}"
        ));
    }

    #[test]
    fn test_hook_validation_indexes() {
        let mut def = valid();
        def.hooks = vec![Hook::after("search", "@tool log")];
        def.phases[1].hooks = vec![Hook {
            when_output: Some(json!({"status": "success"})),
            ..Hook::before("search", "@tool log")
        }];
        let err = validate_definition(&def).unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidHook { index: 1, .. }));
    }

    #[test]
    fn test_legacy_when_key_rejected() {
        let raw = json!({
            "name": "legacy",
            "created": "2025-01-01T00:00:00Z",
            "phases": [{"name": "p", "commands": []}],
            "hooks": [{"after": "search", "when": {"a": 1}, "run": "@tool log"}]
        });
        assert!(matches!(
            parse_definition(&raw.to_string()),
            Err(DefinitionError::Parse { .. })
        ));
    }

    #[test]
    fn test_resolve_arguments() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let mut def = valid();
        def.arguments = vec![
            ArgumentDefinition {
                name: "topic".into(),
                kind: ArgumentType::String,
                description: None,
                required: true,
                default: None,
            },
            ArgumentDefinition {
                name: "depth".into(),
                kind: ArgumentType::String,
                description: None,
                required: false,
                default: Some("2".into()),
            },
            ArgumentDefinition {
                name: "doc".into(),
                kind: ArgumentType::Attachment,
                description: None,
                required: false,
                default: None,
            },
        ];

        let missing = resolve_arguments(&def, &BTreeMap::new()).unwrap_err();
        assert_eq!(
            missing,
            DefinitionError::MissingArgument {
                name: "topic".into()
            }
        );

        let mut provided = BTreeMap::new();
        provided.insert("topic".to_string(), "rust".to_string());
        provided.insert("extra".to_string(), "kept".to_string());
        let resolved = resolve_arguments(&def, &provided).unwrap();
        assert_eq!(resolved["topic"], "rust");
        assert_eq!(resolved["depth"], "2");
        assert_eq!(resolved["extra"], "kept");
        assert!(!resolved.contains_key("doc"));

        provided.insert("doc".to_string(), "/definitely/not/here.pdf".to_string());
        assert!(matches!(
            resolve_arguments(&def, &provided),
            Err(DefinitionError::AttachmentNotFound { .. })
        ));

        provided.insert("doc".to_string(), temp.path().display().to_string());
        resolve_arguments(&def, &provided).unwrap();
    }
}
