// Core Layer
pub mod engine;
pub mod events;
pub mod registry;

pub use engine::{ArchiveEngine, JobTicket};
pub use events::{EventBus, JobEvent, TerminalEvent};
pub use registry::JobRegistry;
