/// Deployment-tunable knobs for the session state machine (§4.6, §9).
#[derive(Debug, Clone, Copy)]
pub struct EnginePolicy {
    /// When true, `transferToAgent` immediately runs auto-assign after
    /// enqueueing instead of leaving the session for an agent to pull.
    pub auto_assign_on_transfer: bool,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            auto_assign_on_transfer: true,
        }
    }
}
