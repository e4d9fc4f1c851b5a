use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::{Builder as TempBuilder, NamedTempFile};
use tracing::{debug, warn};

use crate::system::job::JobContext;
use crate::utils::error::{ArcJobsError, Result};
use crate::utils::paths::{archive_base_name, relativize, resolve_collision_free_directory};

const STAGING_PREFIX: &str = ".arcjobs-";
const STAGING_SUFFIX: &str = ".part";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Jar,
    War,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    TarZst,
    SevenZ,
    Rar,
}

impl ArchiveFormat {
    pub fn display_name(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Jar => "jar",
            ArchiveFormat::War => "war",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::TarBz2 => "tar.bz2",
            ArchiveFormat::TarXz => "tar.xz",
            ArchiveFormat::TarZst => "tar.zst",
            ArchiveFormat::SevenZ => "7z",
            ArchiveFormat::Rar => "rar",
        }
    }

    /// tar 계열은 암호화가 없다
    pub fn is_tar(&self) -> bool {
        matches!(
            self,
            ArchiveFormat::Tar
                | ArchiveFormat::TarGz
                | ArchiveFormat::TarBz2
                | ArchiveFormat::TarXz
                | ArchiveFormat::TarZst
        )
    }
}

pub fn detect_archive_format(path: &Path) -> Option<ArchiveFormat> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    let compressed_tar = [
        (".tar.gz", ArchiveFormat::TarGz),
        (".tgz", ArchiveFormat::TarGz),
        (".tar.bz2", ArchiveFormat::TarBz2),
        (".tbz2", ArchiveFormat::TarBz2),
        (".tbz", ArchiveFormat::TarBz2),
        (".tar.xz", ArchiveFormat::TarXz),
        (".txz", ArchiveFormat::TarXz),
        (".tar.zst", ArchiveFormat::TarZst),
        (".tzst", ArchiveFormat::TarZst),
    ];
    if let Some((_, format)) = compressed_tar
        .iter()
        .find(|(suffix, _)| name.ends_with(suffix))
    {
        return Some(*format);
    }
    match path
        .extension()
        .and_then(OsStr::to_str)?
        .to_lowercase()
        .as_str()
    {
        "zip" => Some(ArchiveFormat::Zip),
        "jar" => Some(ArchiveFormat::Jar),
        "war" => Some(ArchiveFormat::War),
        "tar" => Some(ArchiveFormat::Tar),
        "7z" => Some(ArchiveFormat::SevenZ),
        "rar" => Some(ArchiveFormat::Rar),
        _ => None,
    }
}

/// 압축 대상 항목 (재귀 전개 결과)
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub source_path: PathBuf,
    /// 아카이브 내부 이름 (`/` 구분)
    pub entry_name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// 원본들을 재귀 전개한다. 엔트리 이름은 각 원본의 부모 디렉토리 기준 상대 경로.
pub fn collect_source_items(sources: &[PathBuf]) -> Result<Vec<SourceItem>> {
    let mut items = Vec::new();
    for source in sources {
        if source.file_name().is_none() {
            return Err(ArcJobsError::BadInput(format!(
                "invalid source name: {}",
                source.display()
            )));
        }
        let base = source.parent().unwrap_or_else(|| Path::new(""));
        collect_source_item_recursive(base, source, &mut items)?;
    }
    Ok(items)
}

fn collect_source_item_recursive(
    base: &Path,
    source_path: &Path,
    out: &mut Vec<SourceItem>,
) -> Result<()> {
    let meta = fs::symlink_metadata(source_path).map_err(ArcJobsError::from_io)?;
    let entry_name = relativize(base, source_path);
    if meta.is_dir() {
        out.push(SourceItem {
            source_path: source_path.to_path_buf(),
            entry_name,
            is_dir: true,
            size: 0,
        });
        let mut children = fs::read_dir(source_path)
            .map_err(ArcJobsError::from_io)?
            .collect::<io::Result<Vec<_>>>()
            .map_err(ArcJobsError::from_io)?;
        children.sort_by_key(|entry| entry.file_name());
        for child in children {
            collect_source_item_recursive(base, &child.path(), out)?;
        }
    } else {
        out.push(SourceItem {
            source_path: source_path.to_path_buf(),
            entry_name,
            is_dir: false,
            size: fs::metadata(source_path)
                .map(|m| m.len())
                .unwrap_or_else(|_| meta.len()),
        });
    }
    Ok(())
}

pub fn total_source_bytes(items: &[SourceItem]) -> u64 {
    items.iter().map(|i| i.size).sum()
}

/// 생성 파일 이름에 확장자가 없으면 붙인다 (대소문자 무시)
pub fn with_extension(name: &str, extension: &str) -> String {
    let name = name.trim();
    let suffix = format!(".{}", extension);
    if name.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase()) {
        name.to_string()
    } else {
        format!("{}{}", name, suffix)
    }
}

/// 해제 출력 디렉토리: `destination/<아카이브 이름>` (충돌 시 `_1`, `_2` ...)
pub fn prepare_output_dir(destination: &Path, archive: &Path) -> Result<PathBuf> {
    fs::create_dir_all(destination).map_err(ArcJobsError::from_io)?;
    let base = archive_base_name(archive);
    loop {
        let dir = resolve_collision_free_directory(destination, &base);
        match fs::create_dir(&dir) {
            Ok(()) => {
                debug!(dir = %dir.display(), "output directory created");
                return Ok(dir);
            }
            // 다른 작업이 같은 이름을 먼저 만든 경우 다시 계산
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(ArcJobsError::from_io(e)),
        }
    }
}

/// `dir` 안의 임시 파일. drop되면 지워진다.
pub fn staging_file(dir: &Path) -> Result<NamedTempFile> {
    fs::create_dir_all(dir).map_err(ArcJobsError::from_io)?;
    TempBuilder::new()
        .prefix(STAGING_PREFIX)
        .suffix(STAGING_SUFFIX)
        .tempfile_in(dir)
        .map_err(ArcJobsError::from_io)
}

/// 생성 작업의 임시 출력. 성공 시에만 최종 이름으로 옮겨지고, 그 외에는 삭제된다.
pub struct StagedOutput {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedOutput {
    pub fn create(target: PathBuf) -> Result<Self> {
        if target.symlink_metadata().is_ok() {
            return Err(ArcJobsError::DestinationExists { path: target });
        }
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let temp = staging_file(dir)?;
        Ok(Self { temp, target })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn file_mut(&mut self) -> &mut File {
        self.temp.as_file_mut()
    }

    pub fn persist(self) -> Result<PathBuf> {
        let target = self.target;
        self.temp.persist_noclobber(&target).map_err(|e| {
            if e.error.kind() == ErrorKind::AlreadyExists {
                ArcJobsError::DestinationExists {
                    path: target.clone(),
                }
            } else {
                ArcJobsError::from_io(e.error)
            }
        })?;
        debug!(path = %target.display(), "output persisted");
        Ok(target)
    }
}

/// 해제 중인 파일. `commit` 전에 drop되면 지운다.
pub struct PartialFile {
    path: PathBuf,
    file: Option<File>,
}

impl PartialFile {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ArcJobsError::from_io)?;
        }
        let file = File::create(path).map_err(ArcJobsError::from_io)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    pub fn file_mut(&mut self) -> Option<&mut File> {
        self.file.as_mut()
    }

    pub fn commit(mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(ArcJobsError::from_io)?;
        }
        self.path = PathBuf::new();
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        self.file.take();
        if self.path.as_os_str().is_empty() {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove partial file");
            }
        }
    }
}

/// 엔트리 복사 실패 위치
#[derive(Debug)]
pub enum CopyError {
    /// 원본(디코더) 읽기 실패: 손상 또는 비밀번호 오류
    Read(io::Error),
    /// 출력 쓰기 실패: 공간 부족 등
    Write(io::Error),
    Cancelled,
}

impl CopyError {
    /// 쓰기 실패는 I/O로, 읽기 실패는 호출자가 준 변환으로 처리
    pub fn into_error(self, on_read: impl FnOnce(io::Error) -> ArcJobsError) -> ArcJobsError {
        match self {
            CopyError::Read(e) => on_read(e),
            CopyError::Write(e) => ArcJobsError::from_io(e),
            CopyError::Cancelled => ArcJobsError::Cancelled,
        }
    }
}

/// 청크 단위 복사. 청크마다 취소를 확인하고 `on_chunk`로 바이트 수를 알린다.
pub fn copy_with_checkpoints<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    ctx: &JobContext,
    mut on_chunk: impl FnMut(u64),
) -> std::result::Result<u64, CopyError> {
    let mut buf = vec![0u8; ctx.buffer_size()];
    let mut copied = 0u64;
    loop {
        if ctx.should_cancel() {
            return Err(CopyError::Cancelled);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(CopyError::Read(e)),
        };
        writer.write_all(&buf[..n]).map_err(CopyError::Write)?;
        copied += n as u64;
        on_chunk(n as u64);
    }
    writer.flush().map_err(CopyError::Write)?;
    Ok(copied)
}

/// 읽은 바이트만큼 진행률을 올리는 래퍼. 읽기마다 취소를 확인한다.
pub struct ProgressReader<'a, R> {
    inner: R,
    ctx: &'a JobContext,
}

impl<'a, R: Read> ProgressReader<'a, R> {
    pub fn new(inner: R, ctx: &'a JobContext) -> Self {
        Self { inner, ctx }
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ctx.io_checkpoint()?;
        let n = self.inner.read(buf)?;
        self.ctx.progress().advance_by(n as u64);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::job::test_support::context;
    use tempfile::tempdir;

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::new(ErrorKind::InvalidData, "corrupt block"));
            }
            self.served = true;
            buf[..4].copy_from_slice(b"half");
            Ok(4)
        }
    }

    #[test]
    fn test_detect_archive_format() {
        assert_eq!(
            detect_archive_format(Path::new("/tmp/a.zip")),
            Some(ArchiveFormat::Zip)
        );
        assert_eq!(
            detect_archive_format(Path::new("/tmp/a.JAR")),
            Some(ArchiveFormat::Jar)
        );
        assert_eq!(
            detect_archive_format(Path::new("/tmp/a.tgz")),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            detect_archive_format(Path::new("/tmp/a.tar.bz2")),
            Some(ArchiveFormat::TarBz2)
        );
        assert_eq!(
            detect_archive_format(Path::new("/tmp/a.txz")),
            Some(ArchiveFormat::TarXz)
        );
        assert_eq!(
            detect_archive_format(Path::new("/tmp/a.tar.zst")),
            Some(ArchiveFormat::TarZst)
        );
        assert_eq!(
            detect_archive_format(Path::new("/tmp/a.7z")),
            Some(ArchiveFormat::SevenZ)
        );
        assert_eq!(
            detect_archive_format(Path::new("/tmp/a.rar")),
            Some(ArchiveFormat::Rar)
        );
        assert_eq!(detect_archive_format(Path::new("/tmp/a.7z.001")), None);
    }

    #[test]
    fn test_collect_source_items_uses_parent_relative_names() {
        let temp = tempdir().expect("create tempdir");
        let nested = temp.path().join("nested");
        fs::create_dir_all(nested.join("deep")).expect("create nested dirs");
        fs::write(temp.path().join("alpha.txt"), b"alpha").expect("write alpha");
        fs::write(nested.join("deep").join("beta.txt"), b"beta").expect("write beta");

        let items = collect_source_items(&[temp.path().join("alpha.txt"), nested])
            .expect("collect items");
        let names = items.iter().map(|i| i.entry_name.as_str()).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["alpha.txt", "nested", "nested/deep", "nested/deep/beta.txt"]
        );
        assert_eq!(total_source_bytes(&items), 9);
    }

    #[test]
    fn test_with_extension() {
        assert_eq!(with_extension("backup", "zip"), "backup.zip");
        assert_eq!(with_extension("backup.ZIP", "zip"), "backup.ZIP");
        assert_eq!(with_extension("logs", "tar.gz"), "logs.tar.gz");
    }

    #[test]
    fn test_prepare_output_dir_avoids_collisions() {
        let temp = tempdir().expect("create tempdir");
        let archive = temp.path().join("photos.zip");
        let first = prepare_output_dir(temp.path(), &archive).expect("first dir");
        let second = prepare_output_dir(temp.path(), &archive).expect("second dir");
        assert_eq!(first, temp.path().join("photos"));
        assert_eq!(second, temp.path().join("photos_1"));
        assert!(second.is_dir());
    }

    #[test]
    fn test_staged_output_refuses_existing_target_and_cleans_up() {
        let temp = tempdir().expect("create tempdir");
        let existing = temp.path().join("exists.zip");
        fs::write(&existing, b"old").expect("write existing");
        assert!(matches!(
            StagedOutput::create(existing),
            Err(ArcJobsError::DestinationExists { .. })
        ));

        let target = temp.path().join("new.zip");
        let mut staged = StagedOutput::create(target.clone()).expect("stage output");
        staged.file_mut().write_all(b"data").expect("write staged");
        let staging_path = staged.path().to_path_buf();
        drop(staged);
        assert!(!staging_path.exists());
        assert!(!target.exists());

        let mut staged = StagedOutput::create(target.clone()).expect("stage output");
        staged.file_mut().write_all(b"data").expect("write staged");
        assert_eq!(staged.persist().expect("persist"), target);
        assert_eq!(fs::read(&target).expect("read target"), b"data");
    }

    #[test]
    fn test_partial_file_removed_when_copy_fails() {
        let temp = tempdir().expect("create tempdir");
        let (ctx, _handle) = context();
        let out_path = temp.path().join("out.bin");

        let mut partial = PartialFile::create(&out_path).expect("create partial");
        let mut reader = FailingReader { served: false };
        let result = {
            let file = partial.file_mut().expect("open file");
            copy_with_checkpoints(&mut reader, file, &ctx, |_| {})
        };
        assert!(matches!(result, Err(CopyError::Read(_))));
        assert!(out_path.exists());
        drop(partial);
        assert!(!out_path.exists());
    }

    #[test]
    fn test_committed_partial_file_is_kept() {
        let temp = tempdir().expect("create tempdir");
        let (ctx, _handle) = context();
        let out_path = temp.path().join("sub").join("ok.bin");

        let mut partial = PartialFile::create(&out_path).expect("create partial");
        let mut counted = 0u64;
        {
            let file = partial.file_mut().expect("open file");
            copy_with_checkpoints(&mut &b"payload"[..], file, &ctx, |n| counted += n)
                .expect("copy payload");
        }
        partial.commit().expect("commit");
        assert_eq!(counted, 7);
        assert_eq!(fs::read(&out_path).expect("read output"), b"payload");
    }

    #[test]
    fn test_copy_stops_when_cancelled() {
        let (ctx, handle) = context();
        handle.cancel();
        let mut sink = Vec::new();
        let result = copy_with_checkpoints(&mut &b"payload"[..], &mut sink, &ctx, |_| {});
        assert!(matches!(result, Err(CopyError::Cancelled)));
        assert!(sink.is_empty());
        assert!(ctx.cancel_observed());
    }
}
