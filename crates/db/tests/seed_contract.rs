use std::collections::HashSet;

use parley_db::DemoCatalog;
use toml::Value;

type SeedContractTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `{}` == `{}` (left: {:?}, right: {:?})",
                stringify!($left),
                stringify!($right),
                $left,
                $right
            ));
        }
    };
}

const BUILTIN_ENTITY_TYPES: &[&str] = &["text", "number", "free_text"];
const CONTROL_INTENTS: &[&str] = &["affirm", "deny", "cancel"];

fn demo_document() -> SeedContractTestResult<Value> {
    DemoCatalog::TOML.parse::<Value>().map_err(|error| format!("demo catalog is not TOML: {error}"))
}

fn require_array<'a>(value: &'a Value, field_name: &str) -> SeedContractTestResult<&'a [Value]> {
    value
        .get(field_name)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| format!("missing array field `{field_name}`"))
}

fn require_str<'a>(value: &'a Value, field_name: &str) -> SeedContractTestResult<&'a str> {
    value
        .get(field_name)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing string field `{field_name}`"))
}

fn optional_array<'a>(value: &'a Value, field_name: &str) -> &'a [Value] {
    value.get(field_name).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

fn slot_names(intent: &Value) -> SeedContractTestResult<HashSet<&str>> {
    optional_array(intent, "slots").iter().map(|slot| require_str(slot, "name")).collect()
}

/// Names referenced as `slots.<name>` inside a template.
fn template_slot_references(template: &str) -> Vec<&str> {
    template
        .match_indices("slots.")
        .map(|(index, prefix)| {
            let rest = &template[index + prefix.len()..];
            let end = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            &rest[..end]
        })
        .collect()
}

#[test]
fn every_slot_references_a_declared_entity() -> SeedContractTestResult {
    let document = demo_document()?;

    let mut declared = BUILTIN_ENTITY_TYPES.iter().copied().collect::<HashSet<_>>();
    for entity in require_array(&document, "entities")? {
        let name = require_str(entity, "name")?;
        require!(declared.insert(name), "entity `{name}` declared twice");
    }

    for intent in require_array(&document, "intents")? {
        let intent_name = require_str(intent, "name")?;
        for slot in optional_array(intent, "slots") {
            let entity_type = require_str(slot, "entity_type")?;
            require!(
                declared.contains(entity_type),
                "slot `{intent_name}.{}` uses undeclared entity `{entity_type}`",
                require_str(slot, "name")?
            );
        }
    }
    Ok(())
}

#[test]
fn intents_are_unique_and_trainable() -> SeedContractTestResult {
    let document = demo_document()?;
    let mut seen = HashSet::new();

    for intent in require_array(&document, "intents")? {
        let name = require_str(intent, "name")?;
        require!(seen.insert(name), "intent `{name}` declared twice");
        require!(
            !optional_array(intent, "examples").is_empty(),
            "intent `{name}` has no examples for the statistical backend"
        );
        require!(!name.starts_with('/'), "intent `{name}` must not carry the trigger prefix");
    }

    for control in CONTROL_INTENTS {
        require!(seen.contains(control), "control intent `{control}` is missing");
    }
    Ok(())
}

#[test]
fn required_slots_carry_prompts() -> SeedContractTestResult {
    let document = demo_document()?;

    for intent in require_array(&document, "intents")? {
        let intent_name = require_str(intent, "name")?;
        for slot in optional_array(intent, "slots") {
            let required = slot.get("required").and_then(Value::as_bool).unwrap_or(true);
            let prompt = slot.get("prompt").and_then(Value::as_str).unwrap_or("");
            require!(
                !required || !prompt.trim().is_empty(),
                "required slot `{intent_name}.{}` has no prompt",
                require_str(slot, "name")?
            );
        }
    }
    Ok(())
}

#[test]
fn templates_only_reference_their_own_slots() -> SeedContractTestResult {
    let document = demo_document()?;

    for intent in require_array(&document, "intents")? {
        let intent_name = require_str(intent, "name")?;
        let slots = slot_names(intent)?;
        for field in ["confirmation_template", "response_template"] {
            let Some(template) = intent.get(field).and_then(Value::as_str) else {
                continue;
            };
            for reference in template_slot_references(template) {
                require!(
                    slots.contains(reference),
                    "`{intent_name}.{field}` references unknown slot `{reference}`"
                );
            }
        }
    }
    Ok(())
}

#[test]
fn parsed_catalog_matches_the_raw_document() -> SeedContractTestResult {
    let document = demo_document()?;
    let catalog = DemoCatalog::catalog().map_err(|error| error.to_string())?;

    let raw_names = require_array(&document, "intents")?
        .iter()
        .map(|intent| require_str(intent, "name"))
        .collect::<SeedContractTestResult<Vec<_>>>()?;
    require_eq!(catalog.intent_names(), raw_names);

    for intent in require_array(&document, "intents")? {
        let name = require_str(intent, "name")?;
        let parsed = catalog.intent(name).ok_or_else(|| format!("intent `{name}` not parsed"))?;
        require_eq!(parsed.slots.len(), optional_array(intent, "slots").len());
    }
    Ok(())
}

#[test]
fn template_reference_scanner_reads_slot_names() {
    assert_eq!(
        template_slot_references("To {{ slots.destination }} on {{slots.travel_date}}?"),
        vec!["destination", "travel_date"]
    );
    assert!(template_slot_references("Hello!").is_empty());
}
