// Structural validation of workflow definitions

use std::collections::HashSet;

use super::cluster::{ClusterError, ClusterResult};
use crate::models::WorkflowResource;

/// Check that a workflow definition is internally consistent
///
/// - at least one template, template names unique and non-empty
/// - the entrypoint names an existing template
/// - argument parameters have names
/// - every step and DAG task references an existing template
pub fn validate_workflow(workflow: &WorkflowResource) -> ClusterResult<()> {
    let spec = &workflow.spec;
    if spec.templates.is_empty() {
        return Err(ClusterError::invalid("spec.templates: at least one template is required"));
    }

    let mut names = HashSet::new();
    for template in &spec.templates {
        if template.name.is_empty() {
            return Err(ClusterError::invalid("spec.templates.name is required"));
        }
        if !names.insert(template.name.as_str()) {
            return Err(ClusterError::invalid(format!(
                "spec.templates.{}: duplicate template name",
                template.name
            )));
        }
    }

    if spec.entrypoint.is_empty() {
        return Err(ClusterError::invalid("spec.entrypoint is required"));
    }
    if !names.contains(spec.entrypoint.as_str()) {
        return Err(ClusterError::invalid(format!(
            "spec.entrypoint template '{}' undefined",
            spec.entrypoint
        )));
    }

    if spec.arguments.parameters.iter().any(|p| p.name.is_empty()) {
        return Err(ClusterError::invalid("spec.arguments.parameters.name is required"));
    }

    for template in &spec.templates {
        let step_refs = template.steps.iter().flatten().map(|step| (&step.name, &step.template));
        let task_refs = template
            .dag
            .iter()
            .flat_map(|dag| dag.tasks.iter())
            .map(|task| (&task.name, &task.template));
        for (step, target) in step_refs.chain(task_refs) {
            // References through templateRef are resolved by the engine
            if target.is_empty() {
                continue;
            }
            if !names.contains(target.as_str()) {
                return Err(ClusterError::invalid(format!(
                    "templates.{}.{}: template '{}' undefined",
                    template.name, step, target
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parse_workflows;

    fn parse(manifest: &str) -> WorkflowResource {
        parse_workflows(manifest.as_bytes(), true).unwrap().remove(0)
    }

    const STEPS: &str = r#"
metadata:
  generateName: steps-
spec:
  entrypoint: main
  templates:
  - name: main
    steps:
    - - name: first
        template: work
    - - name: second
        template: work
  - name: work
    container:
      image: alpine
"#;

    #[test]
    fn test_valid_steps_workflow() {
        assert!(validate_workflow(&parse(STEPS)).is_ok());
    }

    #[test]
    fn test_missing_entrypoint_template() {
        let wf = parse(&STEPS.replace("entrypoint: main", "entrypoint: nope"));
        let err = validate_workflow(&wf).unwrap_err();
        assert_eq!(err.status, 422);
        assert!(err.message.contains("nope"));
    }

    #[test]
    fn test_undefined_step_template() {
        let wf = parse(&STEPS.replace("template: work\n    - - name: second", "template: missing\n    - - name: second"));
        let err = validate_workflow(&wf).unwrap_err();
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn test_duplicate_template_names() {
        let wf = parse(&STEPS.replace("- name: work", "- name: main"));
        assert!(validate_workflow(&wf).is_err());
    }

    #[test]
    fn test_no_templates() {
        let wf = parse("spec:\n  entrypoint: main\n  templates: []\n");
        assert!(validate_workflow(&wf).is_err());
    }
}
