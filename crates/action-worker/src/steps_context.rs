// The `steps` expression context: what each finished main stage produced,
// as seen by later steps of the same job or composite action.

use std::collections::HashMap;

use serde_json::{Map, Value};

use action_common::TaskResult;

#[derive(Debug, Clone)]
struct StepRecord {
    outcome: TaskResult,
    conclusion: TaskResult,
    outputs: HashMap<String, String>,
}

/// Main-stage results keyed by step id. Each composite action owns its
/// own instance, so nested ids never leak into the parent.
#[derive(Debug, Clone, Default)]
pub struct StepsContext {
    records: HashMap<String, StepRecord>,
}

impl StepsContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished main stage. `conclusion` differs from `outcome`
    /// only for a failed step with `continue-on-error`.
    pub fn record(
        &mut self,
        step_id: &str,
        outcome: TaskResult,
        conclusion: TaskResult,
        outputs: HashMap<String, String>,
    ) {
        self.records.insert(
            step_id.to_string(),
            StepRecord {
                outcome,
                conclusion,
                outputs,
            },
        );
    }

    /// Record a main stage whose condition evaluated to false.
    pub fn record_skipped(&mut self, step_id: &str) {
        self.record(step_id, TaskResult::Skipped, TaskResult::Skipped, HashMap::new());
    }

    pub fn outcome(&self, step_id: &str) -> Option<TaskResult> {
        self.records.get(step_id).map(|r| r.outcome)
    }

    pub fn conclusion(&self, step_id: &str) -> Option<TaskResult> {
        self.records.get(step_id).map(|r| r.conclusion)
    }

    pub fn output(&self, step_id: &str, name: &str) -> Option<&str> {
        self.records
            .get(step_id)
            .and_then(|r| r.outputs.get(name))
            .map(String::as_str)
    }

    /// `{ <id>: { outcome, conclusion, outputs } }` for expression lookups.
    pub fn to_value(&self) -> Value {
        let steps = self
            .records
            .iter()
            .map(|(id, record)| {
                let outputs: Map<String, Value> = record
                    .outputs
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect();
                let entry = serde_json::json!({
                    "outcome": record.outcome.as_outcome(),
                    "conclusion": record.conclusion.as_outcome(),
                    "outputs": outputs,
                });
                (id.clone(), entry)
            })
            .collect::<Map<_, _>>();
        Value::Object(steps)
    }
}
