//! The record threaded through one workflow run, and its parts.

use serde::{Deserialize, Deserializer, Serialize};

// ── Input ───────────────────────────────────────────────────────────

/// The five raw email fields a workflow run starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailInput {
    pub email_id: String,
    pub from: String,
    pub subject: String,
    pub body: String,
    pub thread_id: String,
}

impl EmailInput {
    pub fn new(
        email_id: impl Into<String>,
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        thread_id: impl Into<String>,
    ) -> Self {
        Self {
            email_id: email_id.into(),
            from: from.into(),
            subject: subject.into(),
            body: body.into(),
            thread_id: thread_id.into(),
        }
    }
}

// ── Step outputs ────────────────────────────────────────────────────

/// Output of the classification step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub is_valid: bool,
    /// Passed through as reported by the model; not clamped.
    pub confidence: f64,
    pub reason: Option<String>,
}

impl Classification {
    /// Negative result used when classification itself fails.
    pub fn rejected() -> Self {
        Self {
            is_valid: false,
            confidence: 0.0,
            reason: None,
        }
    }
}

/// Structured client data pulled out of the email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub client_name: String,
    #[serde(default, deserialize_with = "loose_string")]
    pub company: Option<String>,
    pub project_type: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub timeline: Option<String>,
    /// Free text ("$5k", "Flexible"), never a number.
    #[serde(default, deserialize_with = "loose_string")]
    pub budget: Option<String>,
}

impl ClientProfile {
    /// Record substituted when extraction fails.
    pub fn fallback() -> Self {
        Self {
            client_name: "Unknown Client".into(),
            company: None,
            project_type: "General Inquiry".into(),
            requirements: vec!["Manual review needed".into()],
            timeline: None,
            budget: None,
        }
    }
}

/// Effort band used by the cost multiplier table.
///
/// Labels outside the three known bands are kept verbatim so they can be
/// echoed back in the estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
    Other(String),
}

impl Complexity {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
            Self::Other(label) => label,
        }
    }
}

impl From<String> for Complexity {
    fn from(label: String) -> Self {
        match label.as_str() {
            "simple" => Self::Simple,
            "medium" => Self::Medium,
            "complex" => Self::Complex,
            _ => Self::Other(label),
        }
    }
}

impl From<&str> for Complexity {
    fn from(label: &str) -> Self {
        Self::from(label.to_string())
    }
}

impl From<Complexity> for String {
    fn from(c: Complexity) -> Self {
        c.as_str().to_string()
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One phase of a project plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<String>,
    pub duration: String,
}

/// Output of the planning step. `total_hours` and `complexity` are what the
/// costing step consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectPlan {
    pub phases: Vec<Phase>,
    pub total_hours: u32,
    pub complexity: Complexity,
}

impl ProjectPlan {
    /// Plan substituted when planning fails.
    pub fn fallback() -> Self {
        Self {
            phases: vec![Phase {
                name: "Standard Project".into(),
                tasks: vec!["Planning".into(), "Development".into(), "Review".into()],
                duration: "4-6 weeks".into(),
            }],
            total_hours: 40,
            complexity: Complexity::Medium,
        }
    }
}

/// Cost range plus the inputs it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub min: u64,
    pub max: u64,
    pub hours: u32,
    pub complexity: Complexity,
}

// ── Control metadata ────────────────────────────────────────────────

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classify,
    Extract,
    Plan,
    Cost,
    Propose,
    Done,
    Rejected,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Extract => "extract",
            Self::Plan => "plan",
            Self::Cost => "cost",
            Self::Propose => "propose",
            Self::Done => "done",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Rejected)
    }
}

/// Current-step tag. Observability only; the orchestrator branches on the
/// classification result, never on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Started,
    Classified,
    ClassificationFailed,
    Extracted,
    ExtractionFailed,
    Planned,
    PlannedFallback,
    Costed,
    ProposalGenerated,
    ProposalFallback,
}

impl WorkflowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Classified => "classified",
            Self::ClassificationFailed => "classification_failed",
            Self::Extracted => "extracted",
            Self::ExtractionFailed => "extraction_failed",
            Self::Planned => "planned",
            Self::PlannedFallback => "planned_fallback",
            Self::Costed => "costed",
            Self::ProposalGenerated => "proposal_generated",
            Self::ProposalFallback => "proposal_fallback",
        }
    }
}

impl std::fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Workflow state ──────────────────────────────────────────────────

/// Mutable record owned by exactly one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    // Input (never modified after construction)
    pub email_id: String,
    pub email_from: String,
    pub email_subject: String,
    pub email_body: String,
    pub thread_id: String,

    // Classification
    pub is_valid_inquiry: bool,
    pub confidence_score: f64,
    pub classification_reason: Option<String>,
    pub error: Option<String>,

    // Extraction
    pub client_name: Option<String>,
    pub company: Option<String>,
    pub project_type: Option<String>,
    pub requirements: Option<Vec<String>>,
    pub timeline: Option<String>,
    pub budget: Option<String>,

    // Planning, costing, proposal
    pub project_plan: Option<ProjectPlan>,
    pub cost_estimate: Option<CostEstimate>,
    pub proposal_text: Option<String>,

    // Control
    pub current_step: WorkflowStep,
    /// Never cleared here; review happens in the approval API.
    pub needs_human_review: bool,
    /// Stages that substituted fallback output, in execution order.
    pub fallback_stages: Vec<Stage>,
}

impl WorkflowState {
    /// Fresh state for one email: nothing extracted, not yet valid.
    pub fn new(input: EmailInput) -> Self {
        Self {
            email_id: input.email_id,
            email_from: input.from,
            email_subject: input.subject,
            email_body: input.body,
            thread_id: input.thread_id,
            is_valid_inquiry: false,
            confidence_score: 0.0,
            classification_reason: None,
            error: None,
            client_name: None,
            company: None,
            project_type: None,
            requirements: None,
            timeline: None,
            budget: None,
            project_plan: None,
            cost_estimate: None,
            proposal_text: None,
            current_step: WorkflowStep::Started,
            needs_human_review: true,
            fallback_stages: Vec::new(),
        }
    }

    /// The input fields, as they were at construction.
    pub fn input(&self) -> EmailInput {
        EmailInput {
            email_id: self.email_id.clone(),
            from: self.email_from.clone(),
            subject: self.email_subject.clone(),
            body: self.email_body.clone(),
            thread_id: self.thread_id.clone(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.fallback_stages.is_empty()
    }

    pub fn apply_client_profile(&mut self, profile: ClientProfile) {
        self.client_name = Some(profile.client_name);
        self.company = profile.company;
        self.project_type = Some(profile.project_type);
        self.requirements = Some(profile.requirements);
        self.timeline = profile.timeline;
        self.budget = profile.budget;
    }
}

// ── Serde helpers ───────────────────────────────────────────────────

/// Accept a string, a number, or null where free text is expected.
fn loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
