//! 작업 종류 / 핸들 모델
//!
//! 종류별로 동시에 하나의 작업만 실행된다 (JobRegistry 참고)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::utils::error::ArcJobsError;

/// 작업 식별자 (프로세스 내 단조 증가)
pub type JobId = u64;

/// 작업 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    ExtractSingle,
    ExtractMultiVolumeZip,
    ExtractMultiVolume7z,
    ExtractRar,
    ExtractCodecStream,
    CreateZip,
    CreateSplitZip,
    Create7z,
    CreateTar,
    CompressCodecStream,
}

impl JobKind {
    pub const ALL: [JobKind; 10] = [
        JobKind::ExtractSingle,
        JobKind::ExtractMultiVolumeZip,
        JobKind::ExtractMultiVolume7z,
        JobKind::ExtractRar,
        JobKind::ExtractCodecStream,
        JobKind::CreateZip,
        JobKind::CreateSplitZip,
        JobKind::Create7z,
        JobKind::CreateTar,
        JobKind::CompressCodecStream,
    ];

    /// 작업 종류 이름 반환
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::ExtractSingle => "extract-single",
            JobKind::ExtractMultiVolumeZip => "extract-multi-volume-zip",
            JobKind::ExtractMultiVolume7z => "extract-multi-volume-7z",
            JobKind::ExtractRar => "extract-rar",
            JobKind::ExtractCodecStream => "extract-codec-stream",
            JobKind::CreateZip => "create-zip",
            JobKind::CreateSplitZip => "create-split-zip",
            JobKind::Create7z => "create-7z",
            JobKind::CreateTar => "create-tar",
            JobKind::CompressCodecStream => "compress-codec-stream",
        }
    }

    pub fn is_extract(&self) -> bool {
        matches!(
            self,
            JobKind::ExtractSingle
                | JobKind::ExtractMultiVolumeZip
                | JobKind::ExtractMultiVolume7z
                | JobKind::ExtractRar
                | JobKind::ExtractCodecStream
        )
    }

    /// 비밀번호를 쓸 수 있는 작업인지
    pub fn accepts_password(&self) -> bool {
        !matches!(
            self,
            JobKind::ExtractCodecStream | JobKind::CreateTar | JobKind::CompressCodecStream
        )
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JobKind {
    type Err = ArcJobsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ArcJobsError::BadInput(format!("unknown job kind: {}", s)))
    }
}

/// 작업 상태. 종료 상태(Completed / Failed / Cancelled)에서는 더 이상 바뀌지 않는다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// 등록됨, 작업 스레드 시작 전
    Pending,
    /// 실행 중
    Running,
    /// 완료
    Completed,
    /// 실패
    Failed,
    /// 취소됨
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

/// 실행 중인 작업의 핸들. JobRegistry가 소유하고 작업 스레드는 Weak만 가진다.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    kind: JobKind,
    cancelled: AtomicBool,
    started_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn new(id: JobId, kind: JobKind) -> Self {
        Self {
            id,
            kind,
            cancelled: AtomicBool::new(false),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// 취소 요청. false → true 단방향, 여러 번 호출해도 같다.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_kind_name_roundtrip() {
        for kind in JobKind::ALL {
            assert_eq!(kind.name().parse::<JobKind>().expect("parse kind"), kind);
        }
        assert!("extract-everything".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_password_capable_kinds() {
        assert!(JobKind::CreateZip.accepts_password());
        assert!(JobKind::ExtractMultiVolume7z.accepts_password());
        assert!(!JobKind::CreateTar.accepts_password());
        assert!(!JobKind::CompressCodecStream.accepts_password());
    }

    #[test]
    fn test_cancel_is_monotonic() {
        let handle = JobHandle::new(1, JobKind::CreateZip);
        assert!(!handle.is_cancelled());
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
    }
}
