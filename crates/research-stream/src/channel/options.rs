use crate::model::ResearchType;

/// Per-session options for the socket backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SocketOptions {
    /// Requested research mode. Unknown names are coerced to the default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub research_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgency: Option<String>,
}

impl SocketOptions {
    /// Sets the research mode by wire name.
    pub fn research_type(mut self, research_type: impl Into<String>) -> Self {
        self.research_type = Some(research_type.into());
        self
    }

    /// Sets the research scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets the research depth.
    pub fn depth(mut self, depth: impl Into<String>) -> Self {
        self.depth = Some(depth.into());
        self
    }

    /// Sets the urgency hint.
    pub fn urgency(mut self, urgency: impl Into<String>) -> Self {
        self.urgency = Some(urgency.into());
        self
    }

    pub(crate) fn resolved_research_type(&self) -> ResearchType {
        self.research_type
            .as_deref()
            .map(ResearchType::coerce)
            .unwrap_or_default()
    }
}

/// Per-session options for the event-stream backend.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EventStreamOptions {
    /// Conversation thread. A fresh id is used per session when unset.
    pub thread_id: Option<String>,
    pub max_plan_iterations: u32,
    pub max_step_num: u32,
    pub max_search_results: u32,
    pub auto_accepted_plan: bool,
    pub enable_background_investigation: bool,
    pub report_style: String,
    pub enable_deep_thinking: bool,
}

impl Default for EventStreamOptions {
    fn default() -> Self {
        Self {
            thread_id: None,
            max_plan_iterations: 1,
            max_step_num: 3,
            max_search_results: 3,
            auto_accepted_plan: false,
            enable_background_investigation: true,
            report_style: "academic".to_string(),
            enable_deep_thinking: false,
        }
    }
}

impl EventStreamOptions {
    /// Pins the conversation thread.
    pub fn thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Accepts the research plan without pausing for feedback.
    pub fn auto_accepted_plan(mut self, accepted: bool) -> Self {
        self.auto_accepted_plan = accepted;
        self
    }

    /// Enables the backend's deep-thinking mode.
    pub fn enable_deep_thinking(mut self, enabled: bool) -> Self {
        self.enable_deep_thinking = enabled;
        self
    }

    /// Sets the report style.
    pub fn report_style(mut self, style: impl Into<String>) -> Self {
        self.report_style = style.into();
        self
    }

    /// Sets the search breadth.
    pub fn max_search_results(mut self, max: u32) -> Self {
        self.max_search_results = max;
        self
    }
}
