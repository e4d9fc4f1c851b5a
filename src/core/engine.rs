//! 아카이브 작업 엔진
//!
//! 요청마다 작업 스레드 하나를 띄운다. 종류별 동시 실행은 하나뿐이고,
//! 모든 작업은 종료 이벤트를 정확히 한 번 보낸다.

use chrono::Utc;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::core::events::{EventBus, JobEvent, TerminalEvent};
use crate::core::registry::JobRegistry;
use crate::models::job::{JobId, JobKind, JobState};
use crate::models::progress::ProgressSink;
use crate::models::request::JobRequest;
use crate::system::job::{ArchiveJob, CancelProbe, JobContext};
use crate::utils::error::{ArcJobsError, FailureKind, Result};

const PANIC_REASON: &str = "worker panicked";

pub struct ArchiveEngine {
    registry: Arc<JobRegistry>,
    events: Arc<EventBus>,
    config: Arc<EngineConfig>,
}

impl ArchiveEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            registry: Arc::new(JobRegistry::new()),
            events: Arc::new(EventBus::new()),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn subscribe(&self) -> Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.registry.is_running(kind)
    }

    /// 실행 중인 해당 종류 작업에 취소 요청. 없으면 아무 일도 없다.
    pub fn cancel(&self, kind: JobKind) {
        self.registry.cancel(kind);
    }

    /// 요청을 검증하고 작업 스레드를 띄운다.
    ///
    /// 검증 실패(BadInput)와 같은 종류의 중복 실행(AlreadyRunning)은
    /// 등록이나 이벤트 없이 바로 오류로 돌아온다.
    pub fn submit(&self, request: JobRequest) -> Result<JobTicket> {
        let job = ArchiveJob::from_request(request, &self.config)?;
        let kind = job.kind();
        let weak = self
            .registry
            .try_register(kind)
            .ok_or(ArcJobsError::AlreadyRunning { kind })?;
        let id = match weak.upgrade() {
            Some(handle) => handle.id(),
            None => return Err(ArcJobsError::AlreadyRunning { kind }),
        };

        let progress = Arc::new(ProgressSink::new(id, kind, Arc::clone(&self.events)));
        let ctx = JobContext::new(CancelProbe::new(weak), progress, Arc::clone(&self.config));
        let state = Arc::new(Mutex::new(JobState::Pending));
        let worker = Worker {
            id,
            kind,
            job,
            ctx,
            registry: Arc::clone(&self.registry),
            events: Arc::clone(&self.events),
            state: Arc::clone(&state),
        };

        let spawned = thread::Builder::new()
            .name(format!("arcjobs-{}", kind))
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => {
                info!(job = id, kind = kind.name(), "job submitted");
                Ok(JobTicket {
                    id,
                    kind,
                    state,
                    worker: handle,
                })
            }
            Err(e) => {
                self.registry.finish_job(kind, id);
                Err(ArcJobsError::Io(e))
            }
        }
    }
}

/// 제출된 작업의 핸들
#[derive(Debug)]
pub struct JobTicket {
    id: JobId,
    kind: JobKind,
    state: Arc<Mutex<JobState>>,
    worker: JoinHandle<TerminalEvent>,
}

impl JobTicket {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// 스레드가 시작되기 전까지 Pending, 작업 중에는 Running
    pub fn state(&self) -> JobState {
        *lock_state(&self.state)
    }

    /// 종료 상태가 기록되었는지 (종료 이벤트 직전에 바뀐다)
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// 작업이 끝날 때까지 기다려 종료 결과를 돌려준다
    pub fn wait(self) -> TerminalEvent {
        self.worker.join().unwrap_or_else(|_| TerminalEvent::Failed {
            category: FailureKind::IoFailure,
            reason: PANIC_REASON.to_string(),
        })
    }
}

struct Worker {
    id: JobId,
    kind: JobKind,
    job: ArchiveJob,
    ctx: JobContext,
    registry: Arc<JobRegistry>,
    events: Arc<EventBus>,
    state: Arc<Mutex<JobState>>,
}

impl Worker {
    fn run(self) -> TerminalEvent {
        let Worker {
            id,
            kind,
            job,
            ctx,
            registry,
            events,
            state,
        } = self;

        let slot = SlotGuard {
            registry: &registry,
            kind,
            id,
        };
        *lock_state(&state) = JobState::Running;
        let result = panic::catch_unwind(AssertUnwindSafe(|| job.run(&ctx)));
        let outcome = match result {
            Ok(Ok(())) => {
                ctx.progress().complete();
                TerminalEvent::Completed
            }
            Ok(Err(e)) if e.is_cancelled() || ctx.cancel_observed() => TerminalEvent::Cancelled,
            Ok(Err(e)) => TerminalEvent::Failed {
                category: e.category(),
                reason: e.to_string(),
            },
            Err(_) => TerminalEvent::Failed {
                category: FailureKind::IoFailure,
                reason: PANIC_REASON.to_string(),
            },
        };
        ctx.progress().close();
        let elapsed_ms = registry
            .handle(kind)
            .filter(|handle| handle.id() == id)
            .map(|handle| (Utc::now() - handle.started_at()).num_milliseconds())
            .unwrap_or_default();

        // 종료 이벤트보다 먼저 자리를 비워야 구독자가 곧바로 재제출할 수 있다
        drop(slot);
        *lock_state(&state) = match outcome {
            TerminalEvent::Completed => JobState::Completed,
            TerminalEvent::Failed { .. } => JobState::Failed,
            TerminalEvent::Cancelled => JobState::Cancelled,
        };

        match &outcome {
            TerminalEvent::Completed => {
                info!(job = id, kind = kind.name(), elapsed_ms, "job completed")
            }
            TerminalEvent::Cancelled => {
                info!(job = id, kind = kind.name(), elapsed_ms, "job cancelled")
            }
            TerminalEvent::Failed { category, reason } => warn!(
                job = id,
                kind = kind.name(),
                elapsed_ms,
                category = category.name(),
                reason = %reason,
                "job failed"
            ),
        }
        events.emit(JobEvent::Terminal {
            job: id,
            kind,
            outcome: outcome.clone(),
        });
        outcome
    }
}

/// 작업 스레드가 어떻게 끝나든 등록부 자리를 비운다
struct SlotGuard<'a> {
    registry: &'a JobRegistry,
    kind: JobKind,
    id: JobId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.registry.finish_job(self.kind, self.id);
    }
}

fn lock_state(state: &Mutex<JobState>) -> MutexGuard<'_, JobState> {
    state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
