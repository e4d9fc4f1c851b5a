//! 종류별 실행 중 작업 등록부
//!
//! 모든 연산은 하나의 뮤텍스 아래에서 원자적으로 수행된다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::debug;

use crate::models::job::{JobHandle, JobId, JobKind};

#[derive(Debug)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobKind, Arc<JobHandle>>>,
    next_id: AtomicU64,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 같은 종류가 실행 중이 아니면 등록하고 true
    pub fn try_start(&self, kind: JobKind) -> bool {
        self.try_register(kind).is_some()
    }

    /// 등록 후 작업 쪽에 넘길 Weak 핸들을 돌려준다. 이미 실행 중이면 None.
    pub fn try_register(&self, kind: JobKind) -> Option<Weak<JobHandle>> {
        let mut jobs = self.lock();
        if jobs.contains_key(&kind) {
            debug!(kind = kind.name(), "job kind already running");
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(JobHandle::new(id, kind));
        let weak = Arc::downgrade(&handle);
        jobs.insert(kind, handle);
        Some(weak)
    }

    /// 실행 중인 작업에 취소 요청. 없으면 아무 일도 없다.
    pub fn cancel(&self, kind: JobKind) {
        if let Some(handle) = self.lock().get(&kind) {
            debug!(kind = kind.name(), job = handle.id(), "cancel requested");
            handle.cancel();
        }
    }

    /// 무조건 제거
    pub fn finish(&self, kind: JobKind) {
        self.lock().remove(&kind);
    }

    /// 같은 작업일 때만 제거 (이미 다른 작업이 자리를 차지했으면 그대로 둔다)
    pub fn finish_job(&self, kind: JobKind, id: JobId) {
        let mut jobs = self.lock();
        if jobs.get(&kind).is_some_and(|handle| handle.id() == id) {
            jobs.remove(&kind);
        }
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.lock().contains_key(&kind)
    }

    pub fn running(&self) -> Vec<JobKind> {
        self.lock().keys().copied().collect()
    }

    pub fn handle(&self, kind: JobKind) -> Option<Arc<JobHandle>> {
        self.lock().get(&kind).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobKind, Arc<JobHandle>>> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
