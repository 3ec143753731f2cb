use serde::{Deserialize, Serialize};

/// What the scheduler does with steps whose dependencies can never resolve
/// (a cycle, or a name no step in the phase carries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyMode {
    /// Fail the phase, naming the stuck steps.
    #[default]
    Strict,
    /// Log the stuck steps, record them on the phase report, and move on.
    Lenient,
}
