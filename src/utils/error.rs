use crate::models::job::JobKind;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 실패 분류 (종료 이벤트에 실리는 카테고리)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    BadInput,
    UnsupportedOrCorruptArchive,
    WrongPasswordOrCorruptData,
    MissingVolume,
    StorageExhausted,
    OutOfMemory,
    IoFailure,
    Cancelled,
}

impl FailureKind {
    pub fn name(&self) -> &'static str {
        match self {
            FailureKind::BadInput => "bad input",
            FailureKind::UnsupportedOrCorruptArchive => "unsupported or corrupt archive",
            FailureKind::WrongPasswordOrCorruptData => "wrong password or corrupt data",
            FailureKind::MissingVolume => "missing volume",
            FailureKind::StorageExhausted => "storage exhausted",
            FailureKind::OutOfMemory => "out of memory",
            FailureKind::IoFailure => "I/O failure",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Error, Debug)]
pub enum ArcJobsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    BadInput(String),

    #[error("A {} job is already running", kind.name())]
    AlreadyRunning { kind: JobKind },

    #[error("Unsupported archive format: {}", path.display())]
    ArchiveUnsupportedFormat { path: PathBuf },

    #[error("Password required: {}", path.display())]
    ArchivePasswordRequired { path: PathBuf },

    #[error("Wrong password or corrupt data in {}: {reason}", path.display())]
    ArchiveInvalidPassword { path: PathBuf, reason: String },

    #[error("Failed to extract {}: {reason}", path.display())]
    ArchiveExtractFailed { path: PathBuf, reason: String },

    #[error("Failed to create {}: {reason}", path.display())]
    ArchiveCreateFailed { path: PathBuf, reason: String },

    #[error("Missing volume: {}", path.display())]
    MissingVolume { path: PathBuf },

    #[error("Destination already exists: {}", path.display())]
    DestinationExists { path: PathBuf },

    #[error("No space left on device: {0}")]
    StorageExhausted(io::Error),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("External tool failed: {program}: {reason}")]
    ExternalTool { program: String, reason: String },

    #[error("Job cancelled")]
    Cancelled,
}

impl ArcJobsError {
    /// io::Error를 공간 부족 / 메모리 부족 / 일반 I/O로 분류
    pub fn from_io(error: io::Error) -> Self {
        if is_storage_exhausted(&error) {
            return ArcJobsError::StorageExhausted(error);
        }
        if error.kind() == io::ErrorKind::OutOfMemory {
            return ArcJobsError::OutOfMemory(error.to_string());
        }
        ArcJobsError::Io(error)
    }

    pub fn category(&self) -> FailureKind {
        match self {
            ArcJobsError::Io(_) | ArcJobsError::DestinationExists { .. } => FailureKind::IoFailure,
            ArcJobsError::ExternalTool { .. } => FailureKind::IoFailure,
            ArcJobsError::Config(_) | ArcJobsError::BadInput(_) => FailureKind::BadInput,
            ArcJobsError::AlreadyRunning { .. } => FailureKind::BadInput,
            ArcJobsError::ArchiveUnsupportedFormat { .. }
            | ArcJobsError::ArchiveExtractFailed { .. } => FailureKind::UnsupportedOrCorruptArchive,
            ArcJobsError::ArchiveCreateFailed { .. } => FailureKind::IoFailure,
            ArcJobsError::ArchivePasswordRequired { .. }
            | ArcJobsError::ArchiveInvalidPassword { .. } => {
                FailureKind::WrongPasswordOrCorruptData
            }
            ArcJobsError::MissingVolume { .. } => FailureKind::MissingVolume,
            ArcJobsError::StorageExhausted(_) => FailureKind::StorageExhausted,
            ArcJobsError::OutOfMemory(_) => FailureKind::OutOfMemory,
            ArcJobsError::Cancelled => FailureKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ArcJobsError::Cancelled)
    }
}

/// ENOSPC 판별: ErrorKind 우선, 구형 플랫폼은 메시지로 판별
pub fn is_storage_exhausted(error: &io::Error) -> bool {
    if error.kind() == io::ErrorKind::StorageFull {
        return true;
    }
    let message = error.to_string();
    message.contains("ENOSPC") || message.contains("No space left on device")
}

pub type Result<T> = std::result::Result<T, ArcJobsError>;
