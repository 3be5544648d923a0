// ABOUTME: Pipeline progress projection
// ABOUTME: Folds lifecycle events into per-stage status for the router, domain, and tools stages

use serde::Serialize;

use crate::event::ChatEvent;

/// A backend processing phase surfaced as a progress indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Router,
    Domain,
    Tools,
}

impl Stage {
    /// Resolve an agent name such as `RouterAgent` or `domain` to its stage.
    /// Agents without a stage (the guardrail) return `None`.
    pub fn for_agent(agent: &str) -> Option<Stage> {
        let name = agent.trim().to_ascii_lowercase();
        let name = name.strip_suffix("agent").unwrap_or(&name);
        match name.trim_end_matches(['_', '-', ' ']) {
            "router" => Some(Stage::Router),
            "domain" => Some(Stage::Domain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Idle,
    Active,
    Done,
}

/// Status of every stage. Only ever produced by folding events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PipelineState {
    pub router: StageStatus,
    pub domain: StageStatus,
    pub tools: StageStatus,
}

impl PipelineState {
    /// Recompute the projection from scratch.
    pub fn fold<'a, I>(events: I) -> Self
    where
        I: IntoIterator<Item = &'a ChatEvent>,
    {
        events
            .into_iter()
            .fold(Self::default(), |state, event| state.apply(event))
    }

    /// One step of the fold.
    pub fn apply(mut self, event: &ChatEvent) -> Self {
        match event {
            ChatEvent::AgentStarted { agent, .. } => {
                if let Some(stage) = Stage::for_agent(agent) {
                    *self.slot(stage) = StageStatus::Active;
                }
            }
            ChatEvent::AgentFinished { agent, .. } => {
                if let Some(stage) = Stage::for_agent(agent) {
                    *self.slot(stage) = StageStatus::Done;
                }
            }
            ChatEvent::ToolCall { .. } => self.tools = StageStatus::Active,
            ChatEvent::ToolResult { .. } | ChatEvent::ToolError { .. } => {
                self.tools = StageStatus::Done
            }
            ChatEvent::RouterDecision { .. }
            | ChatEvent::GuardrailBlocked { .. }
            | ChatEvent::Token { .. }
            | ChatEvent::PendingRequest { .. }
            | ChatEvent::Done(_)
            | ChatEvent::Error { .. }
            | ChatEvent::Other { .. } => {}
        }
        self
    }

    pub fn stage(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Router => self.router,
            Stage::Domain => self.domain,
            Stage::Tools => self.tools,
        }
    }

    /// True when no stage has started.
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }

    fn slot(&mut self, stage: Stage) -> &mut StageStatus {
        match stage {
            Stage::Router => &mut self.router,
            Stage::Domain => &mut self.domain,
            Stage::Tools => &mut self.tools,
        }
    }
}
