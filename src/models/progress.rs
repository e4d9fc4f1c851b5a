//! 작업 진행률
//!
//! 카운터를 0 ~ 100 백분율로 바꾸고, 값이 바뀔 때만 이벤트를 보낸다.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

use crate::core::events::{EventBus, JobEvent};
use crate::models::job::{JobId, JobKind};

/// 진행 카운터
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressState {
    /// 전체 작업량 (항목 수 또는 바이트)
    pub total: u64,
    /// 처리한 양
    pub completed: u64,
}

impl ProgressState {
    /// 진행률 계산 (0-100). total이 0이면 0
    pub fn percentage(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let pct = (self.completed as u128 * 100) / self.total as u128;
        pct.min(100) as u8
    }
}

#[derive(Debug, Default)]
struct SinkState {
    counters: ProgressState,
    total_set: bool,
    last_emitted: Option<u8>,
    closed: bool,
}

/// 작업 하나의 진행률 송신기
#[derive(Debug)]
pub struct ProgressSink {
    job: JobId,
    kind: JobKind,
    bus: Arc<EventBus>,
    state: Mutex<SinkState>,
}

impl ProgressSink {
    pub fn new(job: JobId, kind: JobKind, bus: Arc<EventBus>) -> Self {
        Self {
            job,
            kind,
            bus,
            state: Mutex::new(SinkState::default()),
        }
    }

    /// 전체 작업량 설정. 한 번만 유효하며 0% 이벤트를 보낸다.
    pub fn set_total(&self, total: u64) {
        let mut state = self.lock();
        if state.total_set {
            warn!(
                job = self.job,
                kind = self.kind.name(),
                total,
                "progress total already set, ignoring"
            );
            return;
        }
        state.total_set = true;
        state.counters.total = total;
        state.counters.completed = 0;
        self.publish(&mut state);
    }

    pub fn advance(&self) {
        self.advance_by(1);
    }

    pub fn advance_by(&self, amount: u64) {
        if amount == 0 {
            return;
        }
        let mut state = self.lock();
        state.counters.completed = state.counters.completed.saturating_add(amount);
        self.publish(&mut state);
    }

    /// 성공 종료 직전 호출. 100%를 아직 보내지 않았으면 보낸다.
    pub fn complete(&self) {
        let mut state = self.lock();
        if state.closed || state.last_emitted == Some(100) {
            return;
        }
        state.last_emitted = Some(100);
        self.send(100);
    }

    /// 이후 모든 진행 이벤트를 막는다 (종료 이벤트 직전)
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn snapshot(&self) -> ProgressState {
        self.lock().counters
    }

    fn publish(&self, state: &mut SinkState) {
        if state.closed {
            return;
        }
        let percent = state.counters.percentage();
        if state.last_emitted == Some(percent) {
            return;
        }
        // 100은 한 번만, 그리고 되돌아가지 않는다
        if state.last_emitted.is_some_and(|last| last > percent) {
            return;
        }
        state.last_emitted = Some(percent);
        self.send(percent);
    }

    fn send(&self, percent: u8) {
        self.bus.emit(JobEvent::Progress {
            job: self.job,
            kind: self.kind,
            percent,
        });
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::Receiver;

    fn sink() -> (ProgressSink, Receiver<JobEvent>) {
        let bus = Arc::new(EventBus::new());
        let rx = bus.subscribe();
        (ProgressSink::new(1, JobKind::ExtractSingle, bus), rx)
    }

    fn percents(rx: &Receiver<JobEvent>) -> Vec<u8> {
        rx.try_iter()
            .filter_map(|e| match e {
                JobEvent::Progress { percent, .. } => Some(percent),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_percentage() {
        assert_eq!(ProgressState { total: 0, completed: 5 }.percentage(), 0);
        assert_eq!(ProgressState { total: 3, completed: 1 }.percentage(), 33);
        assert_eq!(ProgressState { total: 3, completed: 3 }.percentage(), 100);
        assert_eq!(ProgressState { total: 3, completed: 9 }.percentage(), 100);
        assert_eq!(
            ProgressState { total: u64::MAX, completed: u64::MAX - 1 }.percentage(),
            99
        );
    }

    #[test]
    fn test_events_only_on_change() {
        let (sink, rx) = sink();
        sink.set_total(400);
        for _ in 0..400 {
            sink.advance();
        }
        let got = percents(&rx);
        assert_eq!(got.len(), 101);
        assert_eq!(got.first(), Some(&0));
        assert_eq!(got.last(), Some(&100));
        assert!(got.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_hundred_at_most_once() {
        let (sink, rx) = sink();
        sink.set_total(2);
        sink.advance_by(2);
        sink.advance();
        sink.complete();
        let got = percents(&rx);
        assert_eq!(got.iter().filter(|p| **p == 100).count(), 1);
    }

    #[test]
    fn test_complete_forces_hundred_for_empty_job() {
        let (sink, rx) = sink();
        sink.set_total(0);
        sink.complete();
        assert_eq!(percents(&rx), vec![0, 100]);
    }

    #[test]
    fn test_set_total_only_once_and_close_blocks_events() {
        let (sink, rx) = sink();
        sink.set_total(10);
        sink.set_total(1);
        assert_eq!(sink.snapshot().total, 10);

        sink.advance();
        sink.close();
        sink.advance();
        sink.complete();
        assert_eq!(percents(&rx), vec![0, 10]);
    }
}
