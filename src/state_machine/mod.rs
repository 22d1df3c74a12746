mod coordinator;
mod state;

pub use coordinator::{Coordinator, RoutingDecision};
pub use state::{IncidentFields, ProcessingStatus, ProcessingSummary, WorkflowState};
