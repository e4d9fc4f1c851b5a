//! 7z 드라이버: 단일 / 분할 볼륨 해제, LZMA2 생성 (선택적 AES-256)

use sevenz_rust2::Error as SevenZError;
use sevenz_rust2::Password as SevenZPassword;
use sevenz_rust2::{
    AesEncoderOptions, MethodOptions, SeqReader, SevenZArchiveEntry, SevenZMethod,
    SevenZMethodConfiguration, SevenZReader, SevenZWriter, SourceReader,
};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::request::SevenZOptions;
use crate::system::archive::{
    collect_source_items, copy_with_checkpoints, prepare_output_dir, total_source_bytes,
    PartialFile, ProgressReader, SourceItem, StagedOutput,
};
use crate::system::job::{CreateTarget, ExtractTarget, JobContext};
use crate::system::volume::{MultiVolumeReader, VolumeSet, SEVENZ_VOLUME_EXTENSION};
use crate::utils::error::{is_storage_exhausted, ArcJobsError, Result};
use crate::utils::paths::sanitize_extract_path;

pub const SEVENZ_EXTENSION: &str = "7z";

/// 압축 수준별 LZMA2 사전 크기 (xz 프리셋과 같은 값)
const DICT_SIZES: [u32; 10] = [
    256 << 10,
    1 << 20,
    2 << 20,
    4 << 20,
    4 << 20,
    8 << 20,
    8 << 20,
    16 << 20,
    32 << 20,
    64 << 20,
];

pub fn extract_7z_file(target: &ExtractTarget, ctx: &JobContext) -> Result<()> {
    let file = File::open(&target.archive).map_err(ArcJobsError::from_io)?;
    extract_7z(file, target, ctx)
}

/// `<base>.7z.001`부터 이어 읽는다. 빠진 볼륨은 MissingVolume으로 보고한다.
pub fn extract_7z_volumes(target: &ExtractTarget, ctx: &JobContext) -> Result<()> {
    let set = VolumeSet::discover(&target.archive, SEVENZ_VOLUME_EXTENSION)?;
    debug!(volumes = set.count(), "extracting multi-volume 7z");
    let mut reader = MultiVolumeReader::new(&set, ctx.probe().clone());
    extract_7z(&mut reader, target, ctx).map_err(|e| reader.classify(e))
}

fn extract_7z<R: Read + Seek>(mut source: R, target: &ExtractTarget, ctx: &JobContext) -> Result<()> {
    let path = target.archive.as_path();
    let password = target.password.as_deref();

    let total = {
        let reader = SevenZReader::new(&mut source, seven_password(password))
            .map_err(|e| map_7z_extract_error(path, e, password))?;
        reader.archive().files.len()
    };
    source
        .seek(SeekFrom::Start(0))
        .map_err(ArcJobsError::from_io)?;

    let out_dir = prepare_output_dir(&target.destination, path)?;
    ctx.progress().set_total(total as u64);

    let mut failure: Option<ArcJobsError> = None;
    let mut extract_fn = |entry: &SevenZArchiveEntry,
                          reader: &mut dyn Read,
                          _output_path: &PathBuf|
     -> std::result::Result<bool, SevenZError> {
        match extract_entry(entry, reader, &out_dir, path, password, ctx) {
            Ok(()) => {
                ctx.progress().advance();
                Ok(true)
            }
            Err(e) => {
                failure = Some(e);
                Ok(false)
            }
        }
    };

    let result = match password {
        Some(pass) => sevenz_rust2::decompress_with_extract_fn_and_password(
            &mut source,
            &out_dir,
            SevenZPassword::from(pass),
            &mut extract_fn,
        ),
        None => sevenz_rust2::decompress_with_extract_fn(&mut source, &out_dir, &mut extract_fn),
    };

    if let Some(error) = failure {
        return Err(error);
    }
    result.map_err(|e| map_7z_extract_error(path, e, password))?;
    debug!(entries = total, dir = %out_dir.display(), "7z extracted");
    Ok(())
}

fn extract_entry(
    entry: &SevenZArchiveEntry,
    reader: &mut dyn Read,
    out_dir: &Path,
    archive: &Path,
    password: Option<&str>,
    ctx: &JobContext,
) -> Result<()> {
    ctx.checkpoint()?;
    let dest_path = sanitize_extract_path(out_dir, Path::new(&entry.name)).ok_or_else(|| {
        ArcJobsError::ArchiveExtractFailed {
            path: archive.to_path_buf(),
            reason: format!("{}: blocked unsafe path", entry.name),
        }
    })?;

    if entry.is_directory {
        return fs::create_dir_all(&dest_path).map_err(ArcJobsError::from_io);
    }
    let mut partial = PartialFile::create(&dest_path)?;
    if let Some(out) = partial.file_mut() {
        copy_with_checkpoints(reader, out, ctx, |_| {}).map_err(|e| {
            e.into_error(|io| {
                if password.is_some() {
                    ArcJobsError::ArchiveInvalidPassword {
                        path: archive.to_path_buf(),
                        reason: format!("{}: wrong password or corrupt data ({})", entry.name, io),
                    }
                } else {
                    ArcJobsError::ArchiveExtractFailed {
                        path: archive.to_path_buf(),
                        reason: format!("{}: {}", entry.name, io),
                    }
                }
            })
        })?;
    }
    partial.commit()
}

pub fn create_7z(
    target: &CreateTarget,
    options: &SevenZOptions,
    ctx: &JobContext,
) -> Result<PathBuf> {
    let items = collect_source_items(&target.sources)?;
    ctx.progress().set_total(total_source_bytes(&items));
    if let Some(threads) = options.threads {
        debug!(threads, "7z encoder is single-threaded, thread count is advisory");
    }

    let mut staged = StagedOutput::create(target.output_path())?;
    let output = staged.target().to_path_buf();
    write_7z(
        staged.file_mut(),
        &output,
        &items,
        options,
        target.password.as_deref(),
        ctx,
    )?;
    staged.persist()
}

fn write_7z<W: Write + Seek>(
    writer: W,
    output: &Path,
    items: &[SourceItem],
    options: &SevenZOptions,
    password: Option<&str>,
    ctx: &JobContext,
) -> Result<()> {
    let mut sz = SevenZWriter::new(writer).map_err(|e| create_failed(output, e.to_string()))?;
    sz.set_content_methods(content_methods(options, password));
    sz.set_encrypt_header(password.is_some());

    if options.solid {
        let mut entries = Vec::new();
        let mut readers = Vec::new();
        for item in items {
            ctx.checkpoint()?;
            let entry = SevenZArchiveEntry::from_path(&item.source_path, item.entry_name.clone());
            if item.is_dir {
                sz.push_archive_entry::<ProgressReader<LazyFile>>(entry, None)
                    .map_err(|e| create_failed(output, e.to_string()))?;
            } else {
                entries.push(entry);
                readers.push(SourceReader::new(ProgressReader::new(
                    LazyFile::new(&item.source_path),
                    ctx,
                )));
            }
        }
        if !entries.is_empty() {
            sz.push_archive_entries(entries, SeqReader::new(readers))
                .map_err(|e| create_failed(output, e.to_string()))?;
        }
    } else {
        for item in items {
            ctx.checkpoint()?;
            let entry = SevenZArchiveEntry::from_path(&item.source_path, item.entry_name.clone());
            let reader =
                (!item.is_dir).then(|| ProgressReader::new(LazyFile::new(&item.source_path), ctx));
            sz.push_archive_entry(entry, reader)
                .map_err(|e| create_failed(output, e.to_string()))?;
        }
    }

    ctx.checkpoint()?;
    sz.finish()
        .map_err(|e| create_failed(output, e.to_string()))?;
    Ok(())
}

fn content_methods(
    options: &SevenZOptions,
    password: Option<&str>,
) -> Vec<SevenZMethodConfiguration> {
    let level = (options.level as usize).min(DICT_SIZES.len() - 1);
    let lzma2 = SevenZMethodConfiguration::new(SevenZMethod::LZMA2)
        .with_options(MethodOptions::Num(DICT_SIZES[level]));
    match password {
        Some(pass) => vec![AesEncoderOptions::new(SevenZPassword::from(pass)).into(), lzma2],
        None => vec![lzma2],
    }
}

fn seven_password(password: Option<&str>) -> SevenZPassword {
    password
        .map(SevenZPassword::from)
        .unwrap_or_else(SevenZPassword::empty)
}

fn create_failed(path: &Path, reason: String) -> ArcJobsError {
    let as_io = io::Error::other(reason.clone());
    if is_storage_exhausted(&as_io) {
        return ArcJobsError::StorageExhausted(as_io);
    }
    ArcJobsError::ArchiveCreateFailed {
        path: path.to_path_buf(),
        reason,
    }
}

/// 인코더가 처음 읽을 때 여는 파일. 솔리드 모드에서 모든 원본을 미리 열지 않는다.
struct LazyFile {
    path: PathBuf,
    file: Option<File>,
    done: bool,
}

impl LazyFile {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: None,
            done: false,
        }
    }
}

impl Read for LazyFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done {
            return Ok(0);
        }
        if self.file.is_none() {
            self.file = Some(File::open(&self.path)?);
        }
        let n = match self.file.as_mut() {
            Some(file) => file.read(buf)?,
            None => 0,
        };
        if n == 0 && !buf.is_empty() {
            self.file = None;
            self.done = true;
        }
        Ok(n)
    }
}

/// 비밀번호가 주어진 상태에서 해석할 수 없는 데이터는 비밀번호 오류와 손상을 구분하지 않는다
fn map_7z_extract_error(path: &Path, error: SevenZError, password: Option<&str>) -> ArcJobsError {
    match error {
        SevenZError::PasswordRequired if password.is_none() => {
            ArcJobsError::ArchivePasswordRequired {
                path: path.to_path_buf(),
            }
        }
        SevenZError::PasswordRequired => ArcJobsError::ArchiveInvalidPassword {
            path: path.to_path_buf(),
            reason: "Password required".to_string(),
        },
        SevenZError::MaybeBadPassword(inner) => ArcJobsError::ArchiveInvalidPassword {
            path: path.to_path_buf(),
            reason: inner.to_string(),
        },
        other => {
            let reason = other.to_string();
            if password.is_some() {
                ArcJobsError::ArchiveInvalidPassword {
                    path: path.to_path_buf(),
                    reason: format!("wrong password or corrupt data ({})", reason),
                }
            } else {
                ArcJobsError::ArchiveExtractFailed {
                    path: path.to_path_buf(),
                    reason,
                }
            }
        }
    }
}
