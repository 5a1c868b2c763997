//! Core data model shared across the inference router, message bus,
//! scheduler, and chat pipeline.

pub mod job;
pub mod message;
pub mod mission;
pub mod payload;
pub mod plan;
pub mod task;
pub mod workspace;

pub use job::{ScheduleType, ScheduledJob};
pub use message::{AgentMessage, MessagePriority, MessageType};
pub use mission::{Mission, MissionStatus, TaskResult};
pub use payload::{ResultPayload, TaskPayload};
pub use plan::{Classification, Plan, PlannedTask, ResponseTier};
pub use task::Task;
pub use workspace::WorkspaceEntry;
