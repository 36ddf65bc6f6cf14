//! State machine driving one workflow run.
//!
//! `classify → extract → plan → cost → propose → done`, with a direct
//! `classify → rejected` short-circuit when the email is not a genuine
//! inquiry. Each stage runs exactly once, in order, against a state owned
//! by this run alone.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::cost::calculate_cost;
use super::prompts::ProposalContext;
use super::state::{EmailInput, Stage, WorkflowState, WorkflowStep};
use super::steps::{StepOutcome, WorkflowSteps};
use crate::error::WorkflowError;
use crate::llm::TextCompletionService;

/// Runs workflows against a shared completion service.
///
/// Holds no per-run state, so one orchestrator can drive any number of
/// concurrent runs.
pub struct WorkflowOrchestrator {
    steps: WorkflowSteps,
}

impl WorkflowOrchestrator {
    pub fn new(llm: Arc<dyn TextCompletionService>) -> Self {
        Self {
            steps: WorkflowSteps::new(llm),
        }
    }

    /// Run the full pipeline for one email and return the final state.
    ///
    /// Model failures never surface here; they are absorbed by each step's
    /// fallback. An `Err` means a stage found its inputs missing, which only
    /// happens if the stage order itself is broken.
    pub async fn run_workflow(&self, input: EmailInput) -> Result<WorkflowState, WorkflowError> {
        let mut state = WorkflowState::new(input);
        let mut stage = Stage::Classify;

        while !stage.is_terminal() {
            let next = self.run_stage(stage, &mut state).await?;
            debug!(
                email_id = %state.email_id,
                from = stage.label(),
                to = next.label(),
                step = %state.current_step,
                "Stage transition"
            );
            stage = next;
        }

        info!(
            email_id = %state.email_id,
            outcome = stage.label(),
            step = %state.current_step,
            degraded = state.is_degraded(),
            "Workflow finished"
        );
        Ok(state)
    }

    /// Execute a single stage against `state` and return the stage to run next.
    /// Terminal stages are a no-op and return themselves.
    async fn run_stage(
        &self,
        stage: Stage,
        state: &mut WorkflowState,
    ) -> Result<Stage, WorkflowError> {
        match stage {
            Stage::Classify => Ok(self.classify(state).await),
            Stage::Extract => {
                self.extract(state).await;
                Ok(Stage::Plan)
            }
            Stage::Plan => {
                self.plan(state).await?;
                Ok(Stage::Cost)
            }
            Stage::Cost => {
                cost(state)?;
                Ok(Stage::Propose)
            }
            Stage::Propose => {
                self.propose(state).await?;
                Ok(Stage::Done)
            }
            Stage::Done | Stage::Rejected => Ok(stage),
        }
    }

    async fn classify(&self, state: &mut WorkflowState) -> Stage {
        let outcome = self.steps.classify(&state.input()).await;
        let failed = record_fallback(state, Stage::Classify, &outcome);

        let classification = outcome.into_output();
        state.is_valid_inquiry = classification.is_valid;
        state.confidence_score = classification.confidence;
        state.classification_reason = classification.reason;

        if let Some(reason) = failed {
            state.error = Some(reason);
            state.current_step = WorkflowStep::ClassificationFailed;
        } else {
            state.current_step = WorkflowStep::Classified;
        }

        if state.is_valid_inquiry {
            Stage::Extract
        } else {
            Stage::Rejected
        }
    }

    async fn extract(&self, state: &mut WorkflowState) {
        let outcome = self.steps.extract(&state.input()).await;
        // Cause is logged only; `error` stays classification's.
        let failed = record_fallback(state, Stage::Extract, &outcome).is_some();

        state.apply_client_profile(outcome.into_output());
        state.current_step = if failed {
            WorkflowStep::ExtractionFailed
        } else {
            WorkflowStep::Extracted
        };
    }

    async fn plan(&self, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        let project_type = state
            .project_type
            .clone()
            .ok_or_else(|| violation(Stage::Plan, "project_type is unset"))?;
        let requirements = state.requirements.clone().unwrap_or_default();

        let outcome = self.steps.plan(&project_type, &requirements).await;
        let failed = record_fallback(state, Stage::Plan, &outcome).is_some();

        state.project_plan = Some(outcome.into_output());
        state.current_step = if failed {
            WorkflowStep::PlannedFallback
        } else {
            WorkflowStep::Planned
        };
        Ok(())
    }

    async fn propose(&self, state: &mut WorkflowState) -> Result<(), WorkflowError> {
        let plan = state
            .project_plan
            .as_ref()
            .ok_or_else(|| violation(Stage::Propose, "project_plan is unset"))?;
        let estimate = state
            .cost_estimate
            .as_ref()
            .ok_or_else(|| violation(Stage::Propose, "cost_estimate is unset"))?;
        let client_name = state
            .client_name
            .as_deref()
            .ok_or_else(|| violation(Stage::Propose, "client_name is unset"))?;
        let project_type = state
            .project_type
            .as_deref()
            .ok_or_else(|| violation(Stage::Propose, "project_type is unset"))?;

        let ctx = ProposalContext {
            client_name,
            company: state.company.as_deref(),
            project_type,
            phases: &plan.phases,
            cost_min: estimate.min,
            cost_max: estimate.max,
            timeline: state.timeline.as_deref(),
        };
        let outcome = self.steps.propose(&ctx).await;
        let failed = record_fallback(state, Stage::Propose, &outcome).is_some();

        state.proposal_text = Some(outcome.into_output());
        state.current_step = if failed {
            WorkflowStep::ProposalFallback
        } else {
            WorkflowStep::ProposalGenerated
        };
        Ok(())
    }
}

fn cost(state: &mut WorkflowState) -> Result<(), WorkflowError> {
    let plan = state
        .project_plan
        .as_ref()
        .ok_or_else(|| violation(Stage::Cost, "project_plan is unset"))?;

    let estimate = calculate_cost(plan.total_hours, &plan.complexity);
    debug!(
        email_id = %state.email_id,
        hours = estimate.hours,
        complexity = %estimate.complexity,
        min = estimate.min,
        max = estimate.max,
        "Cost estimated"
    );
    state.cost_estimate = Some(estimate);
    state.current_step = WorkflowStep::Costed;
    Ok(())
}

/// Log a fallback and note the stage on the state. Returns the reason when
/// the step degraded.
fn record_fallback<T>(
    state: &mut WorkflowState,
    stage: Stage,
    outcome: &StepOutcome<T>,
) -> Option<String> {
    let reason = outcome.fallback_reason()?;
    warn!(
        email_id = %state.email_id,
        stage = stage.label(),
        reason,
        "Step fell back to default output"
    );
    state.fallback_stages.push(stage);
    Some(reason.to_string())
}

fn violation(stage: Stage, reason: &str) -> WorkflowError {
    WorkflowError::ContractViolation {
        stage: stage.label().to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::workflow::prompts::{CLASSIFY_MARKER, EXTRACT_MARKER, PLAN_MARKER, PROPOSAL_MARKER};
    use crate::workflow::state::{ClientProfile, Complexity, ProjectPlan};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Per-step scripted replies. `None` makes that step's call fail.
    /// Records which steps were asked.
    struct ScriptedLlm {
        classify: Option<&'static str>,
        extract: Option<&'static str>,
        plan: Option<&'static str>,
        propose: Option<&'static str>,
        calls: Mutex<Vec<&'static str>>,
    }

    const VALID: &str = r#"{"is_valid": true, "confidence": 0.92, "reason": "asks for a website"}"#;
    const PROFILE: &str = r#"{"client_name": "Ana", "company": null, "project_type": "Website",
        "requirements": ["Landing page", "Contact form"], "timeline": null, "budget": "Flexible"}"#;
    const PLAN: &str = r#"```json
{"phases": [{"name": "Design", "tasks": ["Mockups"], "duration": "1 week"},
            {"name": "Build", "tasks": ["Pages", "Form"], "duration": "2 weeks"}],
 "total_hours": 40, "complexity": "medium"}
```"#;
    const LETTER: &str = "Dear Ana,\n\nThanks for reaching out about your website.";

    impl ScriptedLlm {
        fn happy() -> Self {
            Self {
                classify: Some(VALID),
                extract: Some(PROFILE),
                plan: Some(PLAN),
                propose: Some(LETTER),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextCompletionService for ScriptedLlm {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            let (step, reply) = if prompt.starts_with(CLASSIFY_MARKER) {
                ("classify", self.classify)
            } else if prompt.starts_with(EXTRACT_MARKER) {
                ("extract", self.extract)
            } else if prompt.starts_with(PLAN_MARKER) {
                ("plan", self.plan)
            } else if prompt.starts_with(PROPOSAL_MARKER) {
                ("propose", self.propose)
            } else {
                ("unknown", None)
            };
            self.calls.lock().unwrap().push(step);
            reply.map(str::to_string).ok_or_else(|| LlmError::RequestFailed {
                provider: "scripted".into(),
                reason: format!("{step} unavailable"),
            })
        }
    }

    fn input() -> EmailInput {
        EmailInput::new("17", "a@b.com", "I want an app", "need a website", "17")
    }

    async fn run(llm: ScriptedLlm) -> (WorkflowState, Vec<&'static str>) {
        let llm = Arc::new(llm);
        let orchestrator = WorkflowOrchestrator::new(llm.clone());
        let state = orchestrator.run_workflow(input()).await.unwrap();
        (state, llm.calls())
    }

    #[tokio::test]
    async fn happy_path_runs_every_stage() {
        let (state, calls) = run(ScriptedLlm::happy()).await;

        assert_eq!(calls, vec!["classify", "extract", "plan", "propose"]);
        assert_eq!(state.current_step, WorkflowStep::ProposalGenerated);
        assert!(state.is_valid_inquiry);
        assert_eq!(state.confidence_score, 0.92);
        assert_eq!(state.client_name.as_deref(), Some("Ana"));
        assert_eq!(state.project_plan.as_ref().unwrap().phases.len(), 2);

        let estimate = state.cost_estimate.as_ref().unwrap();
        assert_eq!((estimate.min, estimate.max), (2700, 3300));
        assert_eq!(state.proposal_text.as_deref(), Some(LETTER));
        assert!(state.needs_human_review);
        assert!(state.error.is_none());
        assert!(!state.is_degraded());
        // Input fields survive untouched.
        assert_eq!(state.input(), input());
    }

    #[tokio::test]
    async fn proposal_failure_still_produces_letter() {
        let (state, _) = run(ScriptedLlm {
            propose: None,
            ..ScriptedLlm::happy()
        })
        .await;

        assert_eq!(state.current_step, WorkflowStep::ProposalFallback);
        assert_eq!(state.fallback_stages, vec![Stage::Propose]);
        let text = state.proposal_text.unwrap();
        assert!(text.starts_with("Dear Ana,"));
        assert!(text.contains("Investment: $2,700 - $3,300"));
        assert!(text.contains("Estimated timeline: 4-6 weeks"));
    }

    #[tokio::test]
    async fn classification_failure_short_circuits() {
        let (state, calls) = run(ScriptedLlm {
            classify: None,
            ..ScriptedLlm::happy()
        })
        .await;

        assert_eq!(calls, vec!["classify"]);
        assert_eq!(state.current_step, WorkflowStep::ClassificationFailed);
        assert!(!state.is_valid_inquiry);
        assert_eq!(state.confidence_score, 0.0);
        assert_eq!(state.error.as_deref(), Some("Empty response from LLM"));
        assert!(state.client_name.is_none());
        assert!(state.project_plan.is_none());
        assert!(state.cost_estimate.is_none());
        assert!(state.proposal_text.is_none());
    }

    #[tokio::test]
    async fn rejected_inquiry_stops_after_classification() {
        let (state, calls) = run(ScriptedLlm {
            classify: Some(r#"{"is_valid": false, "confidence": 0.97, "reason": "newsletter"}"#),
            ..ScriptedLlm::happy()
        })
        .await;

        assert_eq!(calls, vec!["classify"]);
        assert_eq!(state.current_step, WorkflowStep::Classified);
        assert_eq!(state.classification_reason.as_deref(), Some("newsletter"));
        assert!(state.error.is_none());
        assert!(state.proposal_text.is_none());
    }

    #[tokio::test]
    async fn extraction_failure_uses_fallback_and_keeps_no_error() {
        let (state, calls) = run(ScriptedLlm {
            extract: Some("sorry, I can't do that"),
            ..ScriptedLlm::happy()
        })
        .await;

        assert_eq!(calls.len(), 4);
        let fallback = ClientProfile::fallback();
        assert_eq!(state.client_name.as_deref(), Some(fallback.client_name.as_str()));
        assert_eq!(state.project_type.as_deref(), Some("General Inquiry"));
        assert_eq!(state.requirements, Some(vec!["Manual review needed".to_string()]));
        assert!(state.company.is_none());
        assert!(state.timeline.is_none());
        assert!(state.budget.is_none());
        assert!(state.error.is_none());
        assert_eq!(state.fallback_stages, vec![Stage::Extract]);
        assert_eq!(state.current_step, WorkflowStep::ProposalGenerated);
    }

    #[tokio::test]
    async fn plan_failure_prices_the_fallback_plan() {
        let (state, _) = run(ScriptedLlm {
            plan: None,
            ..ScriptedLlm::happy()
        })
        .await;

        assert_eq!(state.project_plan, Some(ProjectPlan::fallback()));
        let estimate = state.cost_estimate.unwrap();
        assert_eq!(estimate.complexity, Complexity::Medium);
        assert_eq!((estimate.min, estimate.max), (2700, 3300));
        assert!(state.proposal_text.is_some());
    }

    #[tokio::test]
    async fn everything_after_classification_failing_still_yields_proposal() {
        let (state, _) = run(ScriptedLlm {
            extract: None,
            plan: None,
            propose: None,
            ..ScriptedLlm::happy()
        })
        .await;

        assert_eq!(
            state.fallback_stages,
            vec![Stage::Extract, Stage::Plan, Stage::Propose]
        );
        assert_eq!(state.current_step, WorkflowStep::ProposalFallback);
        let text = state.proposal_text.unwrap();
        assert!(text.starts_with("Dear Unknown Client,"));
        assert!(text.contains("• Standard Project: 4-6 weeks"));
    }

    #[tokio::test]
    async fn cost_without_plan_is_a_contract_violation() {
        let orchestrator = WorkflowOrchestrator::new(Arc::new(ScriptedLlm::happy()));
        let mut state = WorkflowState::new(input());

        let err = orchestrator
            .run_stage(Stage::Cost, &mut state)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ContractViolation { ref stage, .. } if stage == "cost"));
        assert!(state.cost_estimate.is_none());
    }

    #[tokio::test]
    async fn terminal_stages_are_noops() {
        let orchestrator = WorkflowOrchestrator::new(Arc::new(ScriptedLlm::happy()));
        let mut state = WorkflowState::new(input());
        let before = state.clone();

        assert_eq!(orchestrator.run_stage(Stage::Done, &mut state).await.unwrap(), Stage::Done);
        assert_eq!(
            orchestrator.run_stage(Stage::Rejected, &mut state).await.unwrap(),
            Stage::Rejected
        );
        assert_eq!(state, before);
    }

    /// Step the machine one stage at a time, recording the tag after each.
    async fn stage_tags(llm: ScriptedLlm) -> Vec<(Stage, WorkflowStep)> {
        let orchestrator = WorkflowOrchestrator::new(Arc::new(llm));
        let mut state = WorkflowState::new(input());
        let mut stage = Stage::Classify;
        let mut tags = Vec::new();
        while !stage.is_terminal() {
            let next = orchestrator.run_stage(stage, &mut state).await.unwrap();
            tags.push((stage, state.current_step));
            stage = next;
        }
        tags
    }

    #[tokio::test]
    async fn each_stage_tags_its_success() {
        let tags = stage_tags(ScriptedLlm::happy()).await;
        assert_eq!(
            tags,
            vec![
                (Stage::Classify, WorkflowStep::Classified),
                (Stage::Extract, WorkflowStep::Extracted),
                (Stage::Plan, WorkflowStep::Planned),
                (Stage::Cost, WorkflowStep::Costed),
                (Stage::Propose, WorkflowStep::ProposalGenerated),
            ]
        );
    }

    #[tokio::test]
    async fn each_stage_tags_its_fallback() {
        let tags = stage_tags(ScriptedLlm {
            extract: None,
            plan: Some("not json"),
            propose: Some("   "),
            ..ScriptedLlm::happy()
        })
        .await;
        assert_eq!(
            tags,
            vec![
                (Stage::Classify, WorkflowStep::Classified),
                (Stage::Extract, WorkflowStep::ExtractionFailed),
                (Stage::Plan, WorkflowStep::PlannedFallback),
                (Stage::Cost, WorkflowStep::Costed),
                (Stage::Propose, WorkflowStep::ProposalFallback),
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_runs_do_not_interfere() {
        let orchestrator = Arc::new(WorkflowOrchestrator::new(Arc::new(ScriptedLlm::happy())));
        let mut handles = Vec::new();
        for i in 0..8 {
            let orchestrator = orchestrator.clone();
            handles.push(tokio::spawn(async move {
                let input = EmailInput::new(i.to_string(), "a@b.com", "Hi", "need a website", i.to_string());
                orchestrator.run_workflow(input).await.unwrap()
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            let state = handle.await.unwrap();
            assert_eq!(state.email_id, i.to_string());
            assert_eq!(state.current_step, WorkflowStep::ProposalGenerated);
        }
    }
}
