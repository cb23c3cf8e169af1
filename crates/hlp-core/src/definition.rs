//! Plan document parsing, normalization and validation.
//!
//! Plans arrive as YAML or JSON. Structural validation (unique IDs, known
//! references, sane limits) runs before anything is scheduled; cycle checks
//! happen when the dependency graph is built (see [`crate::dag`]).

use std::collections::HashSet;
use std::path::Path;

use hlp_types::plan::Plan;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a plan. Any of these rejects
/// the plan before scheduling.
#[derive(Debug, Error)]
pub enum PlanError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Dependency graph contains a cycle.
    #[error("cyclic dependency: {0}")]
    CyclicDependency(String),

    /// A unit or phase references an unknown dependency.
    #[error("unknown dependency: {0}")]
    UnknownDependency(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML plan document and validate it.
pub fn parse_plan_yaml(yaml: &str) -> Result<Plan, PlanError> {
    let plan: Plan =
        serde_yaml_ng::from_str(yaml).map_err(|e| PlanError::ParseError(e.to_string()))?;
    validate_plan(&plan)?;
    Ok(plan)
}

/// Parse a JSON plan document and validate it.
pub fn parse_plan_json(json: &str) -> Result<Plan, PlanError> {
    let plan: Plan =
        serde_json::from_str(json).map_err(|e| PlanError::ParseError(e.to_string()))?;
    validate_plan(&plan)?;
    Ok(plan)
}

/// Load a plan file. `.json` files are parsed as JSON, everything else as YAML.
pub fn load_plan_file(path: &Path) -> Result<Plan, PlanError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_plan_json(&content),
        _ => parse_plan_yaml(&content),
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Fill in derived defaults: display names fall back to IDs and empty
/// idempotency keys become `{plan_id}:{unit_id}`.
pub fn normalize_plan(plan: &mut Plan) {
    let plan_id = plan.id;
    for phase in &mut plan.phases {
        if phase.name.is_empty() {
            phase.name = phase.id.clone();
        }
        for unit in &mut phase.units {
            if unit.name.is_empty() {
                unit.name = unit.id.clone();
            }
            if unit.idempotency_key.is_empty() {
                unit.idempotency_key = format!("{plan_id}:{}", unit.id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a plan.
///
/// Checks:
/// - Plan name is non-empty
/// - Phase IDs are non-empty and unique; phase dependencies exist and are not self-references
/// - Unit IDs are non-empty and unique across the whole plan
/// - Unit dependencies exist and are not self-references
/// - `max_in_flight` >= 1 and `timeout_secs` > 0 when set
///
/// A plan with no units is valid and completes immediately.
pub fn validate_plan(plan: &Plan) -> Result<(), PlanError> {
    if plan.name.trim().is_empty() {
        return Err(PlanError::ValidationError(
            "plan name must not be empty".to_string(),
        ));
    }

    if plan.max_in_flight == Some(0) {
        return Err(PlanError::ValidationError(
            "max_in_flight must be at least 1".to_string(),
        ));
    }

    let mut phase_ids = HashSet::new();
    for phase in &plan.phases {
        if phase.id.is_empty() {
            return Err(PlanError::ValidationError(
                "phase ID must not be empty".to_string(),
            ));
        }
        if !phase_ids.insert(phase.id.as_str()) {
            return Err(PlanError::ValidationError(format!(
                "duplicate phase ID: '{}'",
                phase.id
            )));
        }
    }

    for phase in &plan.phases {
        for dep in &phase.depends_on {
            if dep == &phase.id {
                return Err(PlanError::CyclicDependency(format!(
                    "phase '{}' depends on itself",
                    phase.id
                )));
            }
            if !phase_ids.contains(dep.as_str()) {
                return Err(PlanError::UnknownDependency(format!(
                    "phase '{}' depends on unknown phase '{}'",
                    phase.id, dep
                )));
            }
        }
    }

    let mut unit_ids = HashSet::new();
    for unit in plan.units() {
        if unit.id.is_empty() {
            return Err(PlanError::ValidationError(
                "unit ID must not be empty".to_string(),
            ));
        }
        if !unit_ids.insert(unit.id.as_str()) {
            return Err(PlanError::ValidationError(format!(
                "duplicate unit ID: '{}'",
                unit.id
            )));
        }
        if unit.timeout_secs == Some(0) {
            return Err(PlanError::ValidationError(format!(
                "unit '{}' has timeout_secs = 0",
                unit.id
            )));
        }
    }

    for unit in plan.units() {
        for dep in &unit.depends_on {
            if dep == &unit.id {
                return Err(PlanError::CyclicDependency(format!(
                    "unit '{}' depends on itself",
                    unit.id
                )));
            }
            if !unit_ids.contains(dep.as_str()) {
                return Err(PlanError::UnknownDependency(format!(
                    "unit '{}' depends on unknown unit '{}'",
                    unit.id, dep
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_UNITS: &str = r#"
name: release
phases:
  - id: build
    units:
      - id: a
      - id: b
        depends_on: [a]
      - id: c
        depends_on: [a, b]
"#;

    #[test]
    fn test_parse_yaml_plan() {
        let plan = parse_plan_yaml(THREE_UNITS).unwrap();
        assert_eq!(plan.name, "release");
        assert_eq!(plan.unit_count(), 3);
        assert_eq!(plan.unit("c").unwrap().depends_on, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_json_plan() {
        let json = r#"{"name":"j","phases":[{"id":"p","units":[{"id":"x"}]}]}"#;
        let plan = parse_plan_json(json).unwrap();
        assert_eq!(plan.unit_count(), 1);
    }

    #[test]
    fn test_parse_rejects_malformed_yaml() {
        let err = parse_plan_yaml("name: [unterminated").unwrap_err();
        assert!(matches!(err, PlanError::ParseError(_)), "got: {err}");
    }

    #[test]
    fn test_validation_rejects_duplicate_unit_ids() {
        let yaml = r#"
name: dup
phases:
  - id: one
    units: [{id: a}]
  - id: two
    units: [{id: a}]
"#;
        let msg = parse_plan_yaml(yaml).unwrap_err().to_string();
        assert!(msg.contains("duplicate unit ID"), "got: {msg}");
    }

    #[test]
    fn test_validation_rejects_unknown_dependency() {
        let yaml = r#"
name: unknown
phases:
  - id: one
    units: [{id: a, depends_on: [ghost]}]
"#;
        let err = parse_plan_yaml(yaml).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, PlanError::UnknownDependency(_)));
        assert!(msg.contains("unknown unit 'ghost'"), "got: {msg}");
    }

    #[test]
    fn test_validation_rejects_unknown_phase_dependency() {
        let yaml = r#"
name: unknown-phase
phases:
  - id: one
    depends_on: [zero]
"#;
        let msg = parse_plan_yaml(yaml).unwrap_err().to_string();
        assert!(msg.contains("unknown phase 'zero'"), "got: {msg}");
    }

    #[test]
    fn test_validation_rejects_self_dependency() {
        let yaml = r#"
name: selfish
phases:
  - id: one
    units: [{id: a, depends_on: [a]}]
"#;
        let err = parse_plan_yaml(yaml).unwrap_err();
        assert!(matches!(err, PlanError::CyclicDependency(_)), "got: {err}");
    }

    #[test]
    fn test_validation_rejects_zero_limits() {
        let yaml = r#"
name: limits
max_in_flight: 0
phases: []
"#;
        let msg = parse_plan_yaml(yaml).unwrap_err().to_string();
        assert!(msg.contains("max_in_flight"), "got: {msg}");
    }

    #[test]
    fn test_empty_plan_is_valid() {
        let plan = parse_plan_yaml("name: empty\nphases: []\n").unwrap();
        assert_eq!(plan.unit_count(), 0);
    }

    #[test]
    fn test_normalize_fills_names_and_keys() {
        let mut plan = parse_plan_yaml(THREE_UNITS).unwrap();
        normalize_plan(&mut plan);
        let a = plan.unit("a").unwrap();
        assert_eq!(a.name, "a");
        assert_eq!(a.idempotency_key, format!("{}:a", plan.id));
        assert_eq!(plan.phases[0].name, "build");
    }

    #[test]
    fn test_load_plan_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml_path = dir.path().join("plan.yaml");
        std::fs::write(&yaml_path, THREE_UNITS).unwrap();
        assert_eq!(load_plan_file(&yaml_path).unwrap().unit_count(), 3);

        let json_path = dir.path().join("plan.json");
        std::fs::write(
            &json_path,
            r#"{"name":"j","phases":[{"id":"p","units":[{"id":"x"}]}]}"#,
        )
        .unwrap();
        assert_eq!(load_plan_file(&json_path).unwrap().unit_count(), 1);

        let missing = load_plan_file(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(missing, PlanError::IoError(_)));
    }
}
