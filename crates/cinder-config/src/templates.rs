//! Reusable template fragments.
//!
//! Resolution is an explicit two-pass: all templates are parsed into a
//! [`TemplateMap`] first, then each job is materialized by structural
//! deep-merge. Nothing relies on textual aliasing; the merge is a pure
//! function over parsed values.

use cinder_core::error::ConfigError;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

/// All named fragments of one configuration document.
#[derive(Debug, Clone, Default)]
pub struct TemplateMap {
    templates: BTreeMap<String, Value>,
}

impl TemplateMap {
    pub fn new(templates: BTreeMap<String, Value>) -> Self {
        Self { templates }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.templates.get(name)
    }
}

/// Structural deep-merge, `overlay` winning.
///
/// Mappings merge key-by-key recursively; any other overlay value
/// (scalar or sequence) replaces the base value for that key outright.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, overlay_value) in overlay_map {
                let value = match merged.get(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Mapping(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Materialize one job value: apply its `extends` chain in declared
/// order, then the job's own keys on top.
pub fn resolve_job(
    job_name: &str,
    job: &Value,
    templates: &TemplateMap,
) -> Result<Value, ConfigError> {
    let extends = extends_of(job_name, job)?;

    let mut merged = Value::Mapping(Mapping::new());
    for template_name in &extends {
        let template = templates.get(template_name).ok_or_else(|| {
            ConfigError::UnknownTemplate {
                job: job_name.to_string(),
                template: template_name.clone(),
            }
        })?;
        merged = deep_merge(&merged, template);
    }
    merged = deep_merge(&merged, job);

    // The chain is consumed; drop it so the merged value is self-contained.
    if let Value::Mapping(map) = &mut merged {
        map.remove(&Value::String("extends".to_string()));
    }
    Ok(merged)
}

fn extends_of(job_name: &str, job: &Value) -> Result<Vec<String>, ConfigError> {
    let bad = || ConfigError::Parse(format!(
        "job `{}`: `extends` must be a template name or list of names",
        job_name
    ));

    let Value::Mapping(map) = job else {
        return Err(ConfigError::Parse(format!(
            "job `{}` is not a mapping",
            job_name
        )));
    };

    match map.get(&Value::String("extends".to_string())) {
        None => Ok(vec![]),
        Some(Value::String(name)) => Ok(vec![name.clone()]),
        Some(Value::Sequence(names)) => names
            .iter()
            .map(|v| match v {
                Value::String(name) => Ok(name.clone()),
                _ => Err(bad()),
            })
            .collect(),
        Some(_) => Err(bad()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn value(src: &str) -> Value {
        serde_yaml::from_str(src).unwrap()
    }

    fn map_of(src: &str) -> TemplateMap {
        TemplateMap::new(serde_yaml::from_str(src).unwrap())
    }

    #[test]
    fn test_nested_mappings_merge_key_by_key() {
        let base = value("variables: {A: '1', B: '2'}\nstage: test\n");
        let overlay = value("variables: {B: '3', C: '4'}\n");
        let merged = deep_merge(&base, &overlay);
        assert_eq!(
            merged,
            value("variables: {A: '1', B: '3', C: '4'}\nstage: test\n")
        );
    }

    #[test]
    fn test_sequences_replace_wholesale() {
        let base = value("rules: [{when: always}]\n");
        let overlay = value("rules: [{when: manual}, {when: never}]\n");
        assert_eq!(deep_merge(&base, &overlay), overlay);
    }

    #[test]
    fn test_scalar_replaces_mapping() {
        let base = value("retry: {max: 2}\n");
        let overlay = value("retry: 0\n");
        assert_eq!(deep_merge(&base, &overlay), value("retry: 0\n"));
    }

    #[test]
    fn test_extends_chain_applies_in_order() {
        let templates = map_of(
            "base:\n  variables: {LANG: rust, MODE: debug}\nrelease:\n  variables: {MODE: release}\n",
        );
        let job = value("extends: [base, release]\nstage: build\n");
        let resolved = resolve_job("compile", &job, &templates).unwrap();
        assert_eq!(
            resolved,
            value("variables: {LANG: rust, MODE: release}\nstage: build\n")
        );
    }

    #[test]
    fn test_job_keys_win_over_templates() {
        let templates = map_of("base:\n  stage: test\n  script: make test\n");
        let job = value("extends: base\nscript: make check\n");
        let resolved = resolve_job("check", &job, &templates).unwrap();
        assert_eq!(resolved, value("stage: test\nscript: make check\n"));
    }

    #[test]
    fn test_unknown_template_is_fatal() {
        let templates = TemplateMap::default();
        let job = value("extends: missing\nstage: test\n");
        assert_eq!(
            resolve_job("check", &job, &templates),
            Err(ConfigError::UnknownTemplate {
                job: "check".to_string(),
                template: "missing".to_string(),
            })
        );
    }
}
