//! Process models shared by the engine and service tests.

use std::sync::Arc;

use tasklane_types::definition::{ProcessModel, TaskKind};

use super::definition::parse_model_yaml;

/// Two lanes: the initiator, a finance group, and back to the initiator.
pub const LANES_YAML: &str = r#"
id: lanes
name: Lanes
version: 1.0.0
primary_process: main
processes:
  - id: main
    name: Expense approval
    lanes:
      - name: Initiator
        assignment: initiator
      - name: Finance Team
        assignment: group
        group: Finance Team
    tasks:
      - { id: start, type: start_event }
      - { id: initiator_one, name: Submit expense, type: manual_task, lane: Initiator }
      - { id: finance_approval, name: Approve expense, type: user_task, lane: Finance Team }
      - { id: initiator_two, name: Acknowledge, type: manual_task, lane: Initiator }
      - { id: end, type: end_event }
    flows:
      - { id: f1, source: start, target: initiator_one }
      - { id: f2, source: initiator_one, target: finance_approval }
      - { id: f3, source: finance_approval, target: initiator_two }
      - { id: f4, source: initiator_two, target: end }
"#;

/// Expression lanes fed by data submitted on the first human task.
pub const DYNAMIC_LANES_YAML: &str = r#"
id: dynamic_lanes
name: Dynamic lanes
version: 1.0.0
primary_process: main
processes:
  - id: main
    name: Review
    lanes:
      - name: Reviewers
        assignment: expression
        expression: lane_owners
      - name: Auditors
        assignment: expression
        expression: auditor
    tasks:
      - { id: start, type: start_event }
      - { id: initiator_one, type: manual_task }
      - { id: review_one, type: user_task, lane: Reviewers }
      - { id: review_two, type: user_task, lane: Reviewers }
      - { id: final_review, type: user_task, lane: Auditors }
      - { id: end, type: end_event }
    flows:
      - { id: f1, source: start, target: initiator_one }
      - { id: f2, source: initiator_one, target: review_one }
      - { id: f3, source: review_one, target: review_two }
      - { id: f4, source: review_two, target: final_review }
      - { id: f5, source: final_review, target: end }
"#;

/// A script that fails on its second line.
pub const SCRIPT_ERROR_YAML: &str = r#"
id: script_error
name: Script error
version: 1.0.0
primary_process: main
processes:
  - id: main
    name: Failing script
    tasks:
      - { id: start, type: start_event }
      - id: script_with_error
        type: script_task
        script: |
          my_var = 'THE VAR'
          hey
      - { id: end, type: end_event }
    flows:
      - { id: f1, source: start, target: script_with_error }
      - { id: f2, source: script_with_error, target: end }
"#;

/// Call activities nested two deep under a timer-guarded call activity.
pub const NESTED_YAML: &str = r#"
id: nested
name: Nested
version: 1.0.0
primary_process: main
processes:
  - id: main
    name: Top level
    tasks:
      - { id: start, type: start_event }
      - { id: initial_manual_task, type: manual_task }
      - { id: top_level_subprocess, type: sub_process, process: top_sub }
      - { id: top_level_call_activity, type: call_activity, called_element: level_2 }
      - id: call_timer
        type: boundary_event
        attached_to: top_level_call_activity
        timer: { duration_secs: 3600 }
      - { id: timed_out, type: end_event }
      - { id: top_level_manual_task_two, type: manual_task }
      - { id: end, type: end_event }
    flows:
      - { id: f1, source: start, target: initial_manual_task }
      - { id: f2, source: initial_manual_task, target: top_level_subprocess }
      - { id: f3, source: top_level_subprocess, target: top_level_call_activity }
      - { id: f4, source: top_level_call_activity, target: top_level_manual_task_two }
      - { id: f5, source: top_level_manual_task_two, target: end }
      - { id: f6, source: call_timer, target: timed_out }
  - id: top_sub
    name: Embedded
    tasks:
      - { id: start, type: start_event }
      - { id: top_level_subprocess_script, type: script_task, script: "set_in_top_level_subprocess = 1" }
      - { id: end, type: end_event }
    flows:
      - { id: f1, source: start, target: top_level_subprocess_script }
      - { id: f2, source: top_level_subprocess_script, target: end }
  - id: level_2
    name: Level 2
    tasks:
      - { id: start, type: start_event }
      - { id: level_2_call_activity, type: call_activity, called_element: level_3 }
      - { id: level_2_manual_task, type: manual_task }
      - { id: end, type: end_event }
    flows:
      - { id: f1, source: start, target: level_2_call_activity }
      - { id: f2, source: level_2_call_activity, target: level_2_manual_task }
      - { id: f3, source: level_2_manual_task, target: end }
  - id: level_3
    name: Level 3
    tasks:
      - { id: start, type: start_event }
      - { id: level_3_script_task, type: script_task, script: "set_in_level_3 = 'yes'" }
      - { id: level_3_manual_task, type: manual_task }
      - { id: end, type: end_event }
    flows:
      - { id: f1, source: start, target: level_3_script_task }
      - { id: f2, source: level_3_script_task, target: level_3_manual_task }
      - { id: f3, source: level_3_manual_task, target: end }
"#;

/// A human branch and a script branch joined by a parallel gateway.
pub const PARALLEL_YAML: &str = r#"
id: parallel
name: Parallel
version: 1.0.0
primary_process: main
processes:
  - id: main
    name: Split and join
    tasks:
      - { id: start, type: start_event }
      - { id: split, type: parallel_gateway }
      - { id: branch_review, type: manual_task }
      - { id: branch_script, type: script_task, script: "computed = 40 + 2" }
      - { id: join, type: parallel_gateway }
      - { id: after_join, type: script_task, script: "joined = computed + 1" }
      - { id: end, type: end_event }
    flows:
      - { id: f1, source: start, target: split }
      - { id: f2, source: split, target: branch_review }
      - { id: f3, source: split, target: branch_script }
      - { id: f4, source: branch_review, target: join }
      - { id: f5, source: branch_script, target: join }
      - { id: f6, source: join, target: after_join }
      - { id: f7, source: after_join, target: end }
"#;

/// A review lane visited twice through an exclusive gateway loop.
pub const LOOPBACK_YAML: &str = r#"
id: loopback
name: Loopback
version: 1.0.0
primary_process: main
processes:
  - id: main
    name: Review loop
    lanes:
      - name: Reviewers
        assignment: expression
        expression: "(attempt == 1) ? 'testuser2' : 'testuser3'"
    tasks:
      - { id: start, type: start_event }
      - { id: init, type: script_task, script: "attempt = 1" }
      - { id: review, name: Review, type: user_task, lane: Reviewers }
      - { id: bump, type: script_task, script: "attempt = attempt + 1" }
      - { id: check, type: exclusive_gateway, default_flow: to_end }
      - { id: end, type: end_event }
    flows:
      - { id: f1, source: start, target: init }
      - { id: f2, source: init, target: review }
      - { id: f3, source: review, target: bump }
      - { id: f4, source: bump, target: check }
      - { id: again, source: check, target: review, condition: "attempt < 3" }
      - { id: to_end, source: check, target: end }
"#;

/// A manual task guarded by a timer that fires immediately.
pub const TIMER_YAML: &str = r#"
id: timer
name: Timer
version: 1.0.0
primary_process: main
processes:
  - id: main
    name: Escalation
    tasks:
      - { id: start, type: start_event }
      - { id: wait_for_approval, type: manual_task }
      - id: approval_timeout
        type: boundary_event
        attached_to: wait_for_approval
        timer: { duration_secs: 0 }
      - { id: escalate, type: script_task, script: "escalated = true" }
      - { id: end_timeout, type: end_event }
      - { id: end, type: end_event }
    flows:
      - { id: f1, source: start, target: wait_for_approval }
      - { id: f2, source: wait_for_approval, target: end }
      - { id: f3, source: approval_timeout, target: escalate }
      - { id: f4, source: escalate, target: end_timeout }
"#;

pub fn model(yaml: &str) -> Arc<ProcessModel> {
    Arc::new(parse_model_yaml(yaml).expect("fixture model must be valid"))
}

/// Copy of `model` with every boundary timer set to `duration_secs`, skipping validation.
pub fn retimed(model: &ProcessModel, duration_secs: u64) -> Arc<ProcessModel> {
    let mut model = model.clone();
    for task in model.processes.iter_mut().flat_map(|p| p.tasks.iter_mut()) {
        if let TaskKind::BoundaryEvent { timer, .. } = &mut task.kind {
            timer.duration_secs = duration_secs;
        }
    }
    Arc::new(model)
}
