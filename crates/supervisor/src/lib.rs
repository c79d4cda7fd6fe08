pub mod actor;
pub mod commands;
pub mod handle;
pub mod stage;

pub use actor::SupervisorActor;
pub use commands::{PipelineState, ScraperStatus, SupervisorCommand, SupervisorError};
pub use handle::SupervisorHandle;
pub use stage::{spawn_stage, StageHandle};
