//! Prompt construction for the model-backed workflow steps.
//!
//! Each prompt opens with a fixed marker line. The mock backend routes on
//! these markers, so they are part of the contract and must not drift.

use super::state::{EmailInput, Phase};

pub const CLASSIFY_MARKER: &str = "Analyze this email";
pub const EXTRACT_MARKER: &str = "Extract structured client information";
pub const PLAN_MARKER: &str = "Create project breakdown";
pub const PROPOSAL_MARKER: &str = "Write professional proposal email";

/// Company placeholder when extraction found none.
pub const DEFAULT_COMPANY: &str = "their organization";

/// Timeline placeholder when extraction found none.
pub const DEFAULT_TIMELINE: &str = "4-6 weeks";

/// Classification prompt. Biased toward accepting terse or informal mail.
pub fn build_classify_prompt(email: &EmailInput) -> String {
    format!(
        "{CLASSIFY_MARKER} and determine if it's a genuine business inquiry.\n\
         Be lenient. Short/informal emails like \"I want an app\" ARE valid inquiries.\n\
         Only reject obvious spam, promotions, or recruiting emails.\n\n\
         Subject: {subject}\n\
         From: {from}\n\
         Body: {body}\n\n\
         Return JSON only:\n\
         {{\"is_valid\": true/false, \"confidence\": 0.0-1.0, \"reason\": \"brief explanation\"}}",
        subject = email.subject,
        from = email.from,
        body = email.body,
    )
}

/// Extraction prompt asking for the six client fields.
pub fn build_extract_prompt(email: &EmailInput) -> String {
    format!(
        "{EXTRACT_MARKER}. Return JSON only.\n\n\
         From: {from}\n\
         Subject: {subject}\n\
         Body: {body}\n\n\
         {{\n  \
           \"client_name\": \"name from signature/body\",\n  \
           \"company\": \"company name or null\",\n  \
           \"project_type\": \"main project type\",\n  \
           \"requirements\": [\"req1\", \"req2\"],\n  \
           \"timeline\": \"timeline or null\",\n  \
           \"budget\": \"budget info or 'Flexible'\"\n\
         }}",
        from = email.from,
        subject = email.subject,
        body = email.body,
    )
}

/// Planning prompt. Requirements are rendered comma-joined.
pub fn build_plan_prompt(project_type: &str, requirements: &[String]) -> String {
    format!(
        "{PLAN_MARKER} for: {project_type}\n\
         Requirements: {requirements}\n\n\
         Return JSON only:\n\
         {{\n  \
           \"phases\": [{{\"name\": \"Phase 1\", \"tasks\": [\"task1\", \"task2\"], \"duration\": \"1 week\"}}],\n  \
           \"total_hours\": 40,\n  \
           \"complexity\": \"simple|medium|complex\"\n\
         }}",
        requirements = requirements.join(", "),
    )
}

/// Inputs to the proposal prompt and to its templated fallback.
#[derive(Debug, Clone)]
pub struct ProposalContext<'a> {
    pub client_name: &'a str,
    pub company: Option<&'a str>,
    pub project_type: &'a str,
    pub phases: &'a [Phase],
    pub cost_min: u64,
    pub cost_max: u64,
    pub timeline: Option<&'a str>,
}

impl ProposalContext<'_> {
    pub fn company_or_default(&self) -> &str {
        self.company.unwrap_or(DEFAULT_COMPANY)
    }

    pub fn timeline_or_default(&self) -> &str {
        self.timeline.unwrap_or(DEFAULT_TIMELINE)
    }

    /// "$2,700 - $3,300"
    pub fn cost_range(&self) -> String {
        format!(
            "${} - ${}",
            format_thousands(self.cost_min),
            format_thousands(self.cost_max)
        )
    }
}

/// Proposal prompt asking for a ~200 word body.
pub fn build_proposal_prompt(ctx: &ProposalContext<'_>) -> String {
    format!(
        "{PROPOSAL_MARKER} (BODY ONLY):\n\n\
         Client: {client}\n\
         Company: {company}\n\
         Project: {project}\n\n\
         Scope:\n{scope}\n\n\
         Cost: {cost}\n\
         Timeline: {timeline}\n\n\
         Tone: Professional, friendly, concise (200 words).\n\
         Include: Understanding needs, our approach, timeline, cost, next steps.",
        client = ctx.client_name,
        company = ctx.company_or_default(),
        project = ctx.project_type,
        scope = render_phases(ctx.phases),
        cost = ctx.cost_range(),
        timeline = ctx.timeline_or_default(),
    )
}

/// Deterministic letter used when the proposal call fails.
pub fn render_fallback_proposal(ctx: &ProposalContext<'_>) -> String {
    format!(
        "Dear {client},\n\n\
         Thank you for your inquiry about {project}. We're excited to help!\n\n\
         Our proposed approach:\n{scope}\n\n\
         Estimated timeline: {timeline}\n\
         Investment: {cost}\n\n\
         Next steps:\n\
         1. Schedule discovery call\n\
         2. Finalize requirements\n\
         3. Kickoff project\n\n\
         Best regards,\n\
         Your Development Team",
        client = ctx.client_name,
        project = ctx.project_type,
        scope = render_phases(ctx.phases),
        timeline = ctx.timeline_or_default(),
        cost = ctx.cost_range(),
    )
}

/// One "• name: duration" line per phase.
pub fn render_phases(phases: &[Phase]) -> String {
    phases
        .iter()
        .map(|p| format!("• {}: {}", p.name, p.duration))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render an integer with comma thousands separators.
pub fn format_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> EmailInput {
        EmailInput::new("42", "a@b.com", "I want an app", "need a website", "42")
    }

    fn phases() -> Vec<Phase> {
        vec![
            Phase {
                name: "Discovery".into(),
                tasks: vec!["Workshops".into()],
                duration: "1 week".into(),
            },
            Phase {
                name: "Build".into(),
                tasks: vec![],
                duration: "3 weeks".into(),
            },
        ]
    }

    #[test]
    fn classify_prompt_carries_inputs_and_marker() {
        let prompt = build_classify_prompt(&email());
        assert!(prompt.starts_with(CLASSIFY_MARKER));
        assert!(prompt.contains("Subject: I want an app"));
        assert!(prompt.contains("From: a@b.com"));
        assert!(prompt.contains("Body: need a website"));
        assert!(prompt.contains("\"is_valid\""));
    }

    #[test]
    fn extract_prompt_lists_schema_fields() {
        let prompt = build_extract_prompt(&email());
        assert!(prompt.starts_with(EXTRACT_MARKER));
        for field in ["client_name", "company", "project_type", "requirements", "timeline", "budget"] {
            assert!(prompt.contains(field), "missing {field}");
        }
    }

    #[test]
    fn plan_prompt_joins_requirements() {
        let prompt = build_plan_prompt("Web App", &["Login".into(), "Payments".into()]);
        assert!(prompt.starts_with(PLAN_MARKER));
        assert!(prompt.contains("for: Web App"));
        assert!(prompt.contains("Requirements: Login, Payments"));
    }

    #[test]
    fn phases_render_as_bullets() {
        assert_eq!(
            render_phases(&phases()),
            "• Discovery: 1 week\n• Build: 3 weeks"
        );
    }

    #[test]
    fn thousands_separator() {
        assert_eq!(format_thousands(0), "0");
        assert_eq!(format_thousands(999), "999");
        assert_eq!(format_thousands(2700), "2,700");
        assert_eq!(format_thousands(11000), "11,000");
        assert_eq!(format_thousands(1234567), "1,234,567");
    }

    #[test]
    fn proposal_prompt_uses_placeholders_when_absent() {
        let phases = phases();
        let ctx = ProposalContext {
            client_name: "Dana",
            company: None,
            project_type: "Web App",
            phases: &phases,
            cost_min: 2700,
            cost_max: 3300,
            timeline: None,
        };
        let prompt = build_proposal_prompt(&ctx);
        assert!(prompt.starts_with(PROPOSAL_MARKER));
        assert!(prompt.contains("Company: their organization"));
        assert!(prompt.contains("Timeline: 4-6 weeks"));
        assert!(prompt.contains("Cost: $2,700 - $3,300"));
        assert!(prompt.contains("• Build: 3 weeks"));
    }

    #[test]
    fn fallback_letter_embeds_fields() {
        let phases = phases();
        let ctx = ProposalContext {
            client_name: "Dana",
            company: Some("Acme"),
            project_type: "Web App",
            phases: &phases,
            cost_min: 900,
            cost_max: 1100,
            timeline: Some("2 weeks"),
        };
        let letter = render_fallback_proposal(&ctx);
        assert!(letter.starts_with("Dear Dana,"));
        assert!(letter.contains("inquiry about Web App"));
        assert!(letter.contains("• Discovery: 1 week"));
        assert!(letter.contains("Estimated timeline: 2 weeks"));
        assert!(letter.contains("Investment: $900 - $1,100"));
        assert!(letter.ends_with("Your Development Team"));
    }
}
