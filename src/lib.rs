//! 백그라운드 아카이브 작업 엔진
//!
//! zip / 7z / rar / tar / 단일 스트림 코덱의 해제와 생성을 작업 스레드에서 돌리고,
//! 진행률과 종료 결과를 이벤트로 내보낸다.

pub mod config;
pub mod core;
pub mod models;
pub mod system;
pub mod utils;

pub use config::EngineConfig;
pub use core::{ArchiveEngine, EventBus, JobEvent, JobRegistry, JobTicket, TerminalEvent};
pub use models::{FormatOptions, JobKind, JobRequest, JobState};
pub use utils::error::{ArcJobsError, FailureKind, Result};
