//! Model parsing, validation, and filesystem operations.
//!
//! Converts YAML files into the `ProcessModel` type, validates structural
//! constraints (unique ids, valid flow endpoints, lane and process references),
//! and provides discovery for model files on disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tasklane_types::definition::{ProcessDefinition, ProcessModel, TaskKind, TimerDefinition};
use thiserror::Error;

use super::graph::{check_call_cycles, check_reachability};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or resolving process models.
#[derive(Debug, Error)]
pub enum ModelError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Call activities call each other recursively.
    #[error("call cycle detected: {0}")]
    CallCycle(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `ProcessModel`.
pub fn parse_model_yaml(yaml: &str) -> Result<ProcessModel, ModelError> {
    let model: ProcessModel =
        serde_yaml_ng::from_str(yaml).map_err(|e| ModelError::ParseError(e.to_string()))?;
    validate_model(&model)?;
    Ok(model)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `ProcessModel`.
///
/// Checks:
/// - The primary process exists and process ids are unique
/// - Per process: unique task and flow ids, exactly one start event
/// - Flows connect existing tasks; exclusive default flows leave their gateway
/// - Call activities and sub-processes reference existing processes
/// - Boundary events attach to existing activities and have no incoming flows
/// - Timer durations stay within `TimerDefinition::MAX_DURATION_SECS`
/// - Lanes referenced by tasks exist
/// - Every task is reachable from its start event
/// - Call activities never recurse
pub fn validate_model(model: &ProcessModel) -> Result<(), ModelError> {
    if model.id.is_empty() {
        return Err(ModelError::ValidationError(
            "model id must not be empty".to_string(),
        ));
    }

    let mut process_ids = HashSet::new();
    for process in &model.processes {
        if !process_ids.insert(process.id.as_str()) {
            return Err(ModelError::ValidationError(format!(
                "duplicate process id: '{}'",
                process.id
            )));
        }
    }
    if model.primary().is_none() {
        return Err(ModelError::ValidationError(format!(
            "primary process '{}' is not defined",
            model.primary_process
        )));
    }

    for process in &model.processes {
        validate_process(process, &process_ids)?;
        check_reachability(process)?;
    }
    check_call_cycles(model)?;

    Ok(())
}

fn validate_process(
    process: &ProcessDefinition,
    process_ids: &HashSet<&str>,
) -> Result<(), ModelError> {
    let invalid = |msg: String| ModelError::ValidationError(format!("process '{}': {msg}", process.id));

    let mut task_ids = HashSet::new();
    for task in &process.tasks {
        if !task_ids.insert(task.id.as_str()) {
            return Err(invalid(format!("duplicate task id '{}'", task.id)));
        }
    }

    let starts = process
        .tasks
        .iter()
        .filter(|t| matches!(t.kind, TaskKind::StartEvent))
        .count();
    if starts != 1 {
        return Err(invalid(format!("expected exactly one start event, found {starts}")));
    }

    let mut flow_ids = HashSet::new();
    for flow in &process.flows {
        if !flow_ids.insert(flow.id.as_str()) {
            return Err(invalid(format!("duplicate flow id '{}'", flow.id)));
        }
        for endpoint in [&flow.source, &flow.target] {
            if !task_ids.contains(endpoint.as_str()) {
                return Err(invalid(format!(
                    "flow '{}' references unknown task '{endpoint}'",
                    flow.id
                )));
            }
        }
    }

    for task in &process.tasks {
        match &task.kind {
            TaskKind::ExclusiveGateway {
                default_flow: Some(default_flow),
            } => {
                if !process.outgoing(&task.id).any(|f| &f.id == default_flow) {
                    return Err(invalid(format!(
                        "gateway '{}' default flow '{default_flow}' is not one of its outgoing flows",
                        task.id
                    )));
                }
            }
            TaskKind::CallActivity { called_element: target }
            | TaskKind::SubProcess { process: target } => {
                if !process_ids.contains(target.as_str()) {
                    return Err(invalid(format!(
                        "task '{}' references unknown process '{target}'",
                        task.id
                    )));
                }
            }
            TaskKind::BoundaryEvent {
                attached_to, timer, ..
            } => {
                if timer.duration_secs > TimerDefinition::MAX_DURATION_SECS {
                    return Err(invalid(format!(
                        "boundary event '{}' timer of {}s exceeds the maximum of {}s",
                        task.id,
                        timer.duration_secs,
                        TimerDefinition::MAX_DURATION_SECS
                    )));
                }
                let attached = process.task(attached_to).ok_or_else(|| {
                    invalid(format!(
                        "boundary event '{}' is attached to unknown task '{attached_to}'",
                        task.id
                    ))
                })?;
                let is_activity = attached.kind.is_human()
                    || attached.kind.spawned_process().is_some()
                    || matches!(attached.kind, TaskKind::ScriptTask { .. });
                if !is_activity {
                    return Err(invalid(format!(
                        "boundary event '{}' must attach to an activity, not '{}'",
                        task.id,
                        attached.kind.as_str()
                    )));
                }
                if process.incoming(&task.id).next().is_some() {
                    return Err(invalid(format!(
                        "boundary event '{}' must not have incoming flows",
                        task.id
                    )));
                }
            }
            _ => {}
        }

        if let Some(lane) = &task.lane {
            if process.lane(lane).is_none() {
                return Err(invalid(format!(
                    "task '{}' references unknown lane '{lane}'",
                    task.id
                )));
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a process model from a YAML file.
pub fn load_model_file(path: &Path) -> Result<ProcessModel, ModelError> {
    let content = std::fs::read_to_string(path)?;
    parse_model_yaml(&content)
}

/// Discover all model YAML files under `base_dir`.
///
/// Scans for `.yaml` and `.yml` files recursively. Files that fail to parse or
/// validate are skipped with a warning.
pub fn discover_models(base_dir: &Path) -> Result<Vec<(PathBuf, ProcessModel)>, ModelError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, ProcessModel)>,
) -> Result<(), ModelError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            match load_model_file(&path) {
                Ok(model) => results.push((path, model)),
                Err(e) => tracing::warn!(?path, error = %e, "skipping invalid process model file"),
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures;

    #[test]
    fn test_fixture_models_validate() {
        for yaml in [
            fixtures::LANES_YAML,
            fixtures::SCRIPT_ERROR_YAML,
            fixtures::NESTED_YAML,
            fixtures::PARALLEL_YAML,
            fixtures::LOOPBACK_YAML,
            fixtures::DYNAMIC_LANES_YAML,
            fixtures::TIMER_YAML,
        ] {
            parse_model_yaml(yaml).unwrap();
        }
    }

    #[test]
    fn test_unknown_flow_target_rejected() {
        let yaml = r#"
id: broken
name: Broken
version: 1.0.0
primary_process: main
processes:
  - id: main
    name: Main
    tasks:
      - { id: start, type: start_event }
      - { id: end, type: end_event }
    flows:
      - { id: f1, source: start, target: nowhere }
"#;
        let err = parse_model_yaml(yaml).unwrap_err();
        assert!(matches!(err, ModelError::ValidationError(_)));
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_missing_primary_process_rejected() {
        let yaml = r#"
id: broken
name: Broken
version: 1.0.0
primary_process: other
processes:
  - id: main
    name: Main
    tasks:
      - { id: start, type: start_event }
"#;
        let err = parse_model_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("primary process 'other'"));
    }

    #[test]
    fn test_two_start_events_rejected() {
        let yaml = r#"
id: broken
name: Broken
version: 1.0.0
primary_process: main
processes:
  - id: main
    name: Main
    tasks:
      - { id: a, type: start_event }
      - { id: b, type: start_event }
"#;
        let err = parse_model_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("exactly one start event"));
    }

    #[test]
    fn test_unknown_lane_rejected() {
        let yaml = r#"
id: broken
name: Broken
version: 1.0.0
primary_process: main
processes:
  - id: main
    name: Main
    tasks:
      - { id: start, type: start_event }
      - { id: approve, type: manual_task, lane: Ghosts }
      - { id: end, type: end_event }
    flows:
      - { id: f1, source: start, target: approve }
      - { id: f2, source: approve, target: end }
"#;
        let err = parse_model_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown lane 'Ghosts'"));
    }

    #[test]
    fn test_boundary_on_gateway_rejected() {
        let yaml = r#"
id: broken
name: Broken
version: 1.0.0
primary_process: main
processes:
  - id: main
    name: Main
    tasks:
      - { id: start, type: start_event }
      - { id: split, type: parallel_gateway }
      - { id: timer, type: boundary_event, attached_to: split, timer: { duration_secs: 5 } }
      - { id: end, type: end_event }
    flows:
      - { id: f1, source: start, target: split }
      - { id: f2, source: split, target: end }
      - { id: f3, source: timer, target: end }
"#;
        let err = parse_model_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("must attach to an activity"));
    }

    fn timer_model(duration_secs: u64) -> String {
        format!(
            r#"
id: timed
name: Timed
version: 1.0.0
primary_process: main
processes:
  - id: main
    name: Main
    tasks:
      - {{ id: start, type: start_event }}
      - {{ id: review, type: user_task }}
      - {{ id: timer, type: boundary_event, attached_to: review, timer: {{ duration_secs: {duration_secs} }} }}
      - {{ id: end, type: end_event }}
    flows:
      - {{ id: f1, source: start, target: review }}
      - {{ id: f2, source: review, target: end }}
      - {{ id: f3, source: timer, target: end }}
"#
        )
    }

    #[test]
    fn test_timer_duration_limit() {
        assert!(parse_model_yaml(&timer_model(TimerDefinition::MAX_DURATION_SECS)).is_ok());

        for duration_secs in [TimerDefinition::MAX_DURATION_SECS + 1, 100_000_000_000_000] {
            let err = parse_model_yaml(&timer_model(duration_secs)).unwrap_err();
            assert!(matches!(err, ModelError::ValidationError(_)));
            assert!(err.to_string().contains("exceeds the maximum"), "{err}");
        }
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = parse_model_yaml("id: [unclosed").unwrap_err();
        assert!(matches!(err, ModelError::ParseError(_)));
    }

    #[test]
    fn test_discover_models_skips_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lanes.yaml"), fixtures::LANES_YAML).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/nested.yml"), fixtures::NESTED_YAML).unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "not: [a model").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let found = discover_models(dir.path()).unwrap();
        let mut ids: Vec<_> = found.iter().map(|(_, m)| m.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["lanes".to_string(), "nested".to_string()]);
    }

    #[test]
    fn test_discover_missing_dir_is_empty() {
        let found = discover_models(Path::new("/nonexistent/tasklane/models")).unwrap();
        assert!(found.is_empty());
    }
}
