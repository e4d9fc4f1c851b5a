//! 작업 이벤트 팬아웃
//!
//! 구독자마다 전송 순서(FIFO)를 지키고, 구독자가 없으면 이벤트를 버린다.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use crate::models::job::{JobId, JobKind};
use crate::utils::error::FailureKind;

/// 작업 종료 결과. 작업당 정확히 한 번 발생한다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    Completed,
    Failed {
        category: FailureKind,
        reason: String,
    },
    Cancelled,
}

impl TerminalEvent {
    pub fn is_completed(&self) -> bool {
        matches!(self, TerminalEvent::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// 진행률 (0 ~ 100)
    Progress {
        job: JobId,
        kind: JobKind,
        percent: u8,
    },
    Terminal {
        job: JobId,
        kind: JobKind,
        outcome: TerminalEvent,
    },
}

impl JobEvent {
    pub fn job(&self) -> JobId {
        match self {
            JobEvent::Progress { job, .. } | JobEvent::Terminal { job, .. } => *job,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobEvent::Progress { kind, .. } | JobEvent::Terminal { kind, .. } => *kind,
        }
    }
}

#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<JobEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<JobEvent> {
        let (tx, rx) = mpsc::channel();
        self.lock().push(tx);
        rx
    }

    /// 모든 구독자에게 전달. 끊어진 구독자는 이 시점에 정리된다.
    pub fn emit(&self, event: JobEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<JobEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
