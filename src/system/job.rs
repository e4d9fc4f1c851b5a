//! 작업 본체
//!
//! 요청을 포맷별 드라이버로 변환하고(`ArchiveJob::from_request`),
//! 드라이버는 `JobContext`로 취소 확인과 진행률 보고를 한다.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::models::job::{JobHandle, JobKind};
use crate::models::progress::ProgressSink;
use crate::models::request::{
    Codec, CodecOptions, FormatOptions, JobRequest, SevenZOptions, TarCompression, ZipEncryption,
    ZipOptions,
};
use crate::system::archive::{detect_archive_format, with_extension, ArchiveFormat};
use crate::system::{codec, rar, sevenz, tar, volume, zip};
use crate::utils::error::{ArcJobsError, Result};
use crate::utils::paths::{normalize_multi_volume_name, parse_volume_name};

const DEFAULT_ARCHIVE_NAME: &str = "archive";
const CANCELLED_MESSAGE: &str = "job cancelled";

/// 취소 확인기. 핸들이 이미 사라졌으면 취소로 본다.
#[derive(Debug, Clone)]
pub struct CancelProbe {
    handle: Weak<JobHandle>,
    observed: Arc<AtomicBool>,
}

impl CancelProbe {
    pub fn new(handle: Weak<JobHandle>) -> Self {
        Self {
            handle,
            observed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_cancel(&self) -> bool {
        let cancelled = self
            .handle
            .upgrade()
            .map_or(true, |handle| handle.is_cancelled());
        if cancelled {
            self.observed.store(true, Ordering::Relaxed);
        }
        cancelled
    }

    /// 드라이버가 취소를 한 번이라도 관찰했는지
    pub fn observed(&self) -> bool {
        self.observed.load(Ordering::Relaxed)
    }
}

/// 드라이버 실행 환경
pub struct JobContext {
    probe: CancelProbe,
    progress: Arc<ProgressSink>,
    config: Arc<EngineConfig>,
}

impl JobContext {
    pub fn new(probe: CancelProbe, progress: Arc<ProgressSink>, config: Arc<EngineConfig>) -> Self {
        Self {
            probe,
            progress,
            config,
        }
    }

    pub fn should_cancel(&self) -> bool {
        self.probe.should_cancel()
    }

    /// 항목 / 청크 / 볼륨 경계에서 호출
    pub fn checkpoint(&self) -> Result<()> {
        if self.should_cancel() {
            return Err(ArcJobsError::Cancelled);
        }
        Ok(())
    }

    /// io::Read 구현 안에서 쓰는 체크포인트. Interrupted는 std 복사 루프가
    /// 재시도하므로 다른 종류로 돌려준다.
    pub fn io_checkpoint(&self) -> io::Result<()> {
        if self.should_cancel() {
            return Err(io::Error::other(CANCELLED_MESSAGE));
        }
        Ok(())
    }

    pub fn cancel_observed(&self) -> bool {
        self.probe.observed()
    }

    /// 체크포인트를 지나온 io::Error는 취소로, 나머지는 I/O 분류대로
    pub fn map_io(&self, error: io::Error) -> ArcJobsError {
        if self.cancel_observed() {
            ArcJobsError::Cancelled
        } else {
            ArcJobsError::from_io(error)
        }
    }

    pub fn probe(&self) -> &CancelProbe {
        &self.probe
    }

    pub fn progress(&self) -> &ProgressSink {
        &self.progress
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn buffer_size(&self) -> usize {
        self.config.buffer_size
    }
}

/// 해제 대상
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractTarget {
    pub archive: PathBuf,
    pub destination: PathBuf,
    pub password: Option<String>,
}

/// 생성 대상
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTarget {
    pub sources: Vec<PathBuf>,
    pub destination: PathBuf,
    /// 확장자까지 포함한 출력 파일 이름
    pub file_name: String,
    pub password: Option<String>,
}

impl CreateTarget {
    pub fn output_path(&self) -> PathBuf {
        self.destination.join(&self.file_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveJob {
    ExtractSingle {
        target: ExtractTarget,
        format: ArchiveFormat,
    },
    ExtractMultiVolumeZip(ExtractTarget),
    ExtractMultiVolume7z(ExtractTarget),
    ExtractRar(ExtractTarget),
    ExtractCodecStream {
        target: ExtractTarget,
        codec: Codec,
        is_tar: bool,
    },
    CreateZip {
        target: CreateTarget,
        options: ZipOptions,
    },
    CreateSplitZip {
        target: CreateTarget,
        options: ZipOptions,
        split_size: u64,
    },
    Create7z {
        target: CreateTarget,
        options: SevenZOptions,
    },
    CreateTar {
        target: CreateTarget,
        compression: TarCompression,
    },
    CompressCodecStream {
        source: PathBuf,
        destination: PathBuf,
        options: CodecOptions,
    },
}

impl ArchiveJob {
    /// 요청 검증 + 기본값 적용. 여기서 나는 오류는 모두 BadInput이다.
    pub fn from_request(request: JobRequest, config: &EngineConfig) -> Result<Self> {
        request.validate()?;
        let kind = request.kind;
        let mismatch = |options: &FormatOptions| {
            ArcJobsError::BadInput(format!(
                "{} does not accept {} options",
                kind,
                options.name()
            ))
        };

        if kind.is_extract() && request.options != FormatOptions::Default {
            return Err(mismatch(&request.options));
        }

        let job = match kind {
            JobKind::ExtractSingle => {
                let archive = request.single_source()?.to_path_buf();
                let format = detect_archive_format(&archive).ok_or_else(|| {
                    ArcJobsError::BadInput(format!(
                        "unsupported archive format: {}",
                        archive.display()
                    ))
                })?;
                if format.is_tar() && request.password.is_some() {
                    return Err(ArcJobsError::BadInput(format!(
                        "{} archives cannot be encrypted, password not accepted",
                        format.display_name()
                    )));
                }
                ArchiveJob::ExtractSingle {
                    target: extract_target(archive, request),
                    format,
                }
            }
            JobKind::ExtractMultiVolumeZip | JobKind::ExtractMultiVolume7z => {
                let extension = if kind == JobKind::ExtractMultiVolumeZip {
                    volume::ZIP_VOLUME_EXTENSION
                } else {
                    volume::SEVENZ_VOLUME_EXTENSION
                };
                let source = request.single_source()?;
                let matches = source
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| parse_volume_name(n, extension))
                    .is_some();
                if !matches {
                    return Err(ArcJobsError::BadInput(format!(
                        "not a .{}.NNN volume: {}",
                        extension,
                        source.display()
                    )));
                }
                let target = extract_target(normalize_multi_volume_name(source), request);
                if kind == JobKind::ExtractMultiVolumeZip {
                    ArchiveJob::ExtractMultiVolumeZip(target)
                } else {
                    ArchiveJob::ExtractMultiVolume7z(target)
                }
            }
            JobKind::ExtractRar => {
                let archive = request.single_source()?.to_path_buf();
                if detect_archive_format(&archive) != Some(ArchiveFormat::Rar) {
                    return Err(ArcJobsError::BadInput(format!(
                        "not a rar archive: {}",
                        archive.display()
                    )));
                }
                ArchiveJob::ExtractRar(extract_target(archive, request))
            }
            JobKind::ExtractCodecStream => {
                let source = request.single_source()?.to_path_buf();
                let (codec, is_tar) = Codec::detect(&source).ok_or_else(|| {
                    ArcJobsError::BadInput(format!(
                        "unknown compressed stream: {}",
                        source.display()
                    ))
                })?;
                ArchiveJob::ExtractCodecStream {
                    target: extract_target(source, request),
                    codec,
                    is_tar,
                }
            }
            JobKind::CreateZip | JobKind::CreateSplitZip => {
                let mut options = match &request.options {
                    FormatOptions::Zip(options) => options.clone(),
                    FormatOptions::Default => {
                        default_zip_options(config, kind, request.password.as_deref())
                    }
                    other => return Err(mismatch(other)),
                };
                options.validate(kind, request.password.as_deref())?;
                options.encryption = options.encryption_for(request.password.as_deref());
                let target = create_target(request, zip::ZIP_EXTENSION);
                match options.split_size.take() {
                    Some(split_size) if kind == JobKind::CreateSplitZip => {
                        ArchiveJob::CreateSplitZip {
                            target,
                            options,
                            split_size,
                        }
                    }
                    _ => ArchiveJob::CreateZip { target, options },
                }
            }
            JobKind::Create7z => {
                let options = match &request.options {
                    FormatOptions::SevenZ(options) => options.clone(),
                    FormatOptions::Default => config.sevenz.clone(),
                    other => return Err(mismatch(other)),
                };
                options.validate()?;
                ArchiveJob::Create7z {
                    target: create_target(request, sevenz::SEVENZ_EXTENSION),
                    options,
                }
            }
            JobKind::CreateTar => {
                let compression = match &request.options {
                    FormatOptions::Tar(options) => options.compression,
                    FormatOptions::Default => config.tar.compression,
                    other => return Err(mismatch(other)),
                };
                ArchiveJob::CreateTar {
                    target: create_target(request, compression.extension()),
                    compression,
                }
            }
            JobKind::CompressCodecStream => {
                let options = match &request.options {
                    FormatOptions::Codec(options) => options.clone(),
                    FormatOptions::Default => config.codec.clone(),
                    other => return Err(mismatch(other)),
                };
                options.validate()?;
                ArchiveJob::CompressCodecStream {
                    source: request.single_source()?.to_path_buf(),
                    destination: request.destination,
                    options,
                }
            }
        };
        Ok(job)
    }

    pub fn kind(&self) -> JobKind {
        match self {
            ArchiveJob::ExtractSingle { .. } => JobKind::ExtractSingle,
            ArchiveJob::ExtractMultiVolumeZip(_) => JobKind::ExtractMultiVolumeZip,
            ArchiveJob::ExtractMultiVolume7z(_) => JobKind::ExtractMultiVolume7z,
            ArchiveJob::ExtractRar(_) => JobKind::ExtractRar,
            ArchiveJob::ExtractCodecStream { .. } => JobKind::ExtractCodecStream,
            ArchiveJob::CreateZip { .. } => JobKind::CreateZip,
            ArchiveJob::CreateSplitZip { .. } => JobKind::CreateSplitZip,
            ArchiveJob::Create7z { .. } => JobKind::Create7z,
            ArchiveJob::CreateTar { .. } => JobKind::CreateTar,
            ArchiveJob::CompressCodecStream { .. } => JobKind::CompressCodecStream,
        }
    }

    /// 대표 입력 경로 (로그용)
    pub fn primary_path(&self) -> &Path {
        match self {
            ArchiveJob::ExtractSingle { target, .. }
            | ArchiveJob::ExtractMultiVolumeZip(target)
            | ArchiveJob::ExtractMultiVolume7z(target)
            | ArchiveJob::ExtractRar(target)
            | ArchiveJob::ExtractCodecStream { target, .. } => &target.archive,
            ArchiveJob::CreateZip { target, .. }
            | ArchiveJob::CreateSplitZip { target, .. }
            | ArchiveJob::Create7z { target, .. }
            | ArchiveJob::CreateTar { target, .. } => &target.destination,
            ArchiveJob::CompressCodecStream { source, .. } => source,
        }
    }

    pub fn run(&self, ctx: &JobContext) -> Result<()> {
        ctx.checkpoint()?;
        info!(kind = self.kind().name(), path = %self.primary_path().display(), "job running");
        match self {
            ArchiveJob::ExtractSingle { target, format } => {
                debug!(format = format.display_name(), "archive format detected");
                match format {
                    ArchiveFormat::Zip | ArchiveFormat::Jar | ArchiveFormat::War => {
                        zip::extract_zip_file(target, ctx)
                    }
                    ArchiveFormat::SevenZ => sevenz::extract_7z_file(target, ctx),
                    ArchiveFormat::Rar => rar::extract_rar(target, ctx),
                    ArchiveFormat::Tar => tar::extract_tar_file(target, None, ctx),
                    ArchiveFormat::TarGz => tar::extract_tar_file(target, Some(Codec::Gzip), ctx),
                    ArchiveFormat::TarBz2 => tar::extract_tar_file(target, Some(Codec::Bzip2), ctx),
                    ArchiveFormat::TarXz => tar::extract_tar_file(target, Some(Codec::Xz), ctx),
                    ArchiveFormat::TarZst => tar::extract_tar_file(target, Some(Codec::Zstd), ctx),
                }
            }
            ArchiveJob::ExtractMultiVolumeZip(target) => zip::extract_zip_volumes(target, ctx),
            ArchiveJob::ExtractMultiVolume7z(target) => sevenz::extract_7z_volumes(target, ctx),
            ArchiveJob::ExtractRar(target) => rar::extract_rar(target, ctx),
            ArchiveJob::ExtractCodecStream {
                target,
                codec,
                is_tar,
            } => {
                if *is_tar {
                    tar::extract_tar_file(target, Some(*codec), ctx)
                } else {
                    codec::extract_stream(target, *codec, ctx).map(|_| ())
                }
            }
            ArchiveJob::CreateZip { target, options } => {
                zip::create_zip(target, options, ctx).map(|_| ())
            }
            ArchiveJob::CreateSplitZip {
                target,
                options,
                split_size,
            } => zip::create_split_zip(target, options, *split_size, ctx).map(|_| ()),
            ArchiveJob::Create7z { target, options } => {
                sevenz::create_7z(target, options, ctx).map(|_| ())
            }
            ArchiveJob::CreateTar {
                target,
                compression,
            } => tar::create_tar(target, *compression, ctx).map(|_| ()),
            ArchiveJob::CompressCodecStream {
                source,
                destination,
                options,
            } => codec::compress_stream(source, destination, options, ctx).map(|_| ()),
        }
    }
}

fn extract_target(archive: PathBuf, request: JobRequest) -> ExtractTarget {
    ExtractTarget {
        archive,
        destination: request.destination,
        password: request.password,
    }
}

fn create_target(request: JobRequest, extension: &str) -> CreateTarget {
    let name = request
        .archive_name
        .as_deref()
        .unwrap_or(DEFAULT_ARCHIVE_NAME);
    CreateTarget {
        file_name: with_extension(name, extension),
        sources: request.sources,
        destination: request.destination,
        password: request.password,
    }
}

/// 설정 기본값 기준. 비밀번호 유무로 암호화 여부를 정한다.
fn default_zip_options(config: &EngineConfig, kind: JobKind, password: Option<&str>) -> ZipOptions {
    let mut options = config.zip.clone();
    options.encryption = match (password, options.encryption) {
        (None, _) => ZipEncryption::None,
        (Some(_), ZipEncryption::None) => ZipEncryption::Aes,
        (Some(_), configured) => configured,
    };
    if kind != JobKind::CreateSplitZip {
        options.split_size = None;
    }
    options
}


#[cfg(test)]
mod tests {
    use super::test_support::context;
    use super::*;
    use crate::models::request::{TarOptions, ZipMethod};
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::write(path, b"x").expect("write fixture");
    }

    #[test]
    fn test_checkpoint_treats_dropped_handle_as_cancelled() {
        let (ctx, handle) = context();
        assert!(ctx.checkpoint().is_ok());
        assert!(!ctx.cancel_observed());
        drop(handle);
        assert!(matches!(ctx.checkpoint(), Err(ArcJobsError::Cancelled)));
        let io_err = ctx.io_checkpoint().expect_err("cancelled io checkpoint");
        assert_ne!(io_err.kind(), io::ErrorKind::Interrupted);
        assert!(ctx.cancel_observed());
    }

    #[test]
    fn test_from_request_resolves_multi_volume_and_defaults() {
        let temp = tempdir().expect("create tempdir");
        let third = temp.path().join("photos.7z.003");
        touch(&third);
        let config = EngineConfig::default();

        let job = ArchiveJob::from_request(
            JobRequest::new(JobKind::ExtractMultiVolume7z, vec![third], temp.path()),
            &config,
        )
        .expect("build job");
        match job {
            ArchiveJob::ExtractMultiVolume7z(target) => {
                assert_eq!(target.archive, temp.path().join("photos.7z.001"));
            }
            other => panic!("unexpected job: {:?}", other),
        }

        let plain = temp.path().join("photos.7z");
        touch(&plain);
        let rejected = ArchiveJob::from_request(
            JobRequest::new(JobKind::ExtractMultiVolume7z, vec![plain], temp.path()),
            &config,
        );
        assert!(matches!(rejected, Err(ArcJobsError::BadInput(_))));
    }

    #[test]
    fn test_from_request_zip_defaults_follow_password() {
        let temp = tempdir().expect("create tempdir");
        let src = temp.path().join("a.txt");
        touch(&src);
        let config = EngineConfig::default();

        let plain = ArchiveJob::from_request(
            JobRequest::new(JobKind::CreateZip, vec![src.clone()], temp.path()),
            &config,
        )
        .expect("plain zip job");
        match plain {
            ArchiveJob::CreateZip { target, options } => {
                assert_eq!(target.file_name, "archive.zip");
                assert_eq!(options.encryption, ZipEncryption::None);
                assert_eq!(options.method, ZipMethod::Deflate);
            }
            other => panic!("unexpected job: {:?}", other),
        }

        let secret = ArchiveJob::from_request(
            JobRequest::new(JobKind::CreateZip, vec![src.clone()], temp.path())
                .with_archive_name("secret")
                .with_password("pw"),
            &config,
        )
        .expect("encrypted zip job");
        match secret {
            ArchiveJob::CreateZip { target, options } => {
                assert_eq!(target.file_name, "secret.zip");
                assert_eq!(options.encryption, ZipEncryption::Aes);
            }
            other => panic!("unexpected job: {:?}", other),
        }

        // 명시한 옵션의 암호화 방식도 비밀번호가 없으면 적용되지 않는다
        let explicit = ArchiveJob::from_request(
            JobRequest::new(JobKind::CreateZip, vec![src.clone()], temp.path())
                .with_options(FormatOptions::Zip(ZipOptions::default())),
            &config,
        )
        .expect("explicit options without password");
        match explicit {
            ArchiveJob::CreateZip { options, .. } => {
                assert_eq!(options.encryption, ZipEncryption::None)
            }
            other => panic!("unexpected job: {:?}", other),
        }

        let no_split = ArchiveJob::from_request(
            JobRequest::new(JobKind::CreateSplitZip, vec![src], temp.path()),
            &config,
        );
        assert!(matches!(no_split, Err(ArcJobsError::BadInput(_))));
    }

    #[test]
    fn test_from_request_rejects_mismatched_options() {
        let temp = tempdir().expect("create tempdir");
        let src = temp.path().join("a.txt");
        touch(&src);
        let config = EngineConfig::default();

        let result = ArchiveJob::from_request(
            JobRequest::new(JobKind::Create7z, vec![src.clone()], temp.path())
                .with_options(FormatOptions::Tar(TarOptions::default())),
            &config,
        );
        assert!(matches!(result, Err(ArcJobsError::BadInput(_))));

        let tar = ArchiveJob::from_request(
            JobRequest::new(JobKind::CreateTar, vec![src], temp.path())
                .with_archive_name("logs")
                .with_options(FormatOptions::Tar(TarOptions {
                    compression: TarCompression::Gzip,
                })),
            &config,
        )
        .expect("tar job");
        match tar {
            ArchiveJob::CreateTar { target, .. } => assert_eq!(target.file_name, "logs.tar.gz"),
            other => panic!("unexpected job: {:?}", other),
        }
    }

    #[test]
    fn test_from_request_detects_stream_codec() {
        let temp = tempdir().expect("create tempdir");
        let stream = temp.path().join("dump.sql.xz");
        touch(&stream);
        let unknown = temp.path().join("dump.sql");
        touch(&unknown);
        let config = EngineConfig::default();

        let job = ArchiveJob::from_request(
            JobRequest::new(JobKind::ExtractCodecStream, vec![stream], temp.path()),
            &config,
        )
        .expect("stream job");
        assert!(matches!(
            job,
            ArchiveJob::ExtractCodecStream {
                codec: Codec::Xz,
                is_tar: false,
                ..
            }
        ));

        let rejected = ArchiveJob::from_request(
            JobRequest::new(JobKind::ExtractCodecStream, vec![unknown], temp.path()),
            &config,
        );
        assert!(matches!(rejected, Err(ArcJobsError::BadInput(_))));
    }

    #[test]
    fn test_from_request_rejects_password_for_tar() {
        let temp = tempdir().expect("create tempdir");
        let tarball = temp.path().join("logs.tar.gz");
        touch(&tarball);
        let zip = temp.path().join("logs.zip");
        touch(&zip);
        let config = EngineConfig::default();

        let rejected = ArchiveJob::from_request(
            JobRequest::new(JobKind::ExtractSingle, vec![tarball.clone()], temp.path())
                .with_password("pw"),
            &config,
        );
        assert!(matches!(rejected, Err(ArcJobsError::BadInput(_))));

        let plain = ArchiveJob::from_request(
            JobRequest::new(JobKind::ExtractSingle, vec![tarball], temp.path()),
            &config,
        )
        .expect("tar without password");
        assert!(matches!(
            plain,
            ArchiveJob::ExtractSingle {
                format: ArchiveFormat::TarGz,
                ..
            }
        ));

        let encrypted_zip = ArchiveJob::from_request(
            JobRequest::new(JobKind::ExtractSingle, vec![zip], temp.path()).with_password("pw"),
            &config,
        );
        assert!(encrypted_zip.is_ok());
    }
}
