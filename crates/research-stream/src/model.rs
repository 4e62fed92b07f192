use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Wire protocol family used to reach the reasoning service.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Persistent duplex WebSocket connection.
    Socket,
    /// Server-push event stream over a single HTTP request.
    EventStream,
}

impl BackendKind {
    /// Returns the stable string id of the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::EventStream => "event_stream",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Research mode requested from the socket backend.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchType {
    MarketAnalysis,
    CompetitorAnalysis,
    CustomerDiscovery,
    FinancialProjection,
    RiskAssessment,
    BusinessModel,
    GoToMarket,
    #[default]
    Comprehensive,
}

impl ResearchType {
    /// Every accepted research type, in wire order.
    pub const ALL: [ResearchType; 8] = [
        Self::MarketAnalysis,
        Self::CompetitorAnalysis,
        Self::CustomerDiscovery,
        Self::FinancialProjection,
        Self::RiskAssessment,
        Self::BusinessModel,
        Self::GoToMarket,
        Self::Comprehensive,
    ];

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarketAnalysis => "market_analysis",
            Self::CompetitorAnalysis => "competitor_analysis",
            Self::CustomerDiscovery => "customer_discovery",
            Self::FinancialProjection => "financial_projection",
            Self::RiskAssessment => "risk_assessment",
            Self::BusinessModel => "business_model",
            Self::GoToMarket => "go_to_market",
            Self::Comprehensive => "comprehensive",
        }
    }

    /// Parses a wire name, falling back to the default for anything unknown.
    ///
    /// Unknown values are never rejected; the server only accepts the fixed
    /// set, so the request is sent with the default instead.
    pub fn coerce(value: &str) -> Self {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        match Self::ALL.iter().find(|t| t.as_str() == normalized) {
            Some(found) => *found,
            None => {
                tracing::debug!(research_type = value, "unknown research type, using default");
                Self::default()
            }
        }
    }
}

impl fmt::Display for ResearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session options passed to `ResearchSession::start`.
#[derive(Clone, Debug, Default)]
pub struct StartOptions {
    /// Caller-supplied correlation id. A v4 UUID is generated when unset.
    pub session_id: Option<String>,
    /// Overrides the engine's reveal rate (characters per second).
    pub reveal_rate: Option<u32>,
    /// Overrides the engine's absolute session timeout.
    pub timeout: Option<Duration>,
    pub(crate) backend_options: HashMap<BackendKind, serde_json::Value>,
}

impl StartOptions {
    /// Sets the correlation id.
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    /// Sets the per-session reveal rate.
    pub fn reveal_rate(mut self, chars_per_second: u32) -> Self {
        self.reveal_rate = Some(chars_per_second);
        self
    }

    /// Sets the per-session absolute timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn set_backend_options_json(
        mut self,
        backend: BackendKind,
        value: serde_json::Value,
    ) -> Self {
        self.backend_options.insert(backend, value);
        self
    }

    pub(crate) fn backend_options_value(&self, backend: BackendKind) -> Option<&serde_json::Value> {
        self.backend_options.get(&backend)
    }
}
