//! tar 드라이버 (무압축 / gzip / bzip2 / xz / lzma / zstd)

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive as TarArchive, Builder as TarBuilder, EntryType, Header};
use tracing::debug;

use crate::models::request::{Codec, TarCompression};
use crate::system::archive::{
    collect_source_items, copy_with_checkpoints, prepare_output_dir, total_source_bytes,
    PartialFile, ProgressReader, SourceItem, StagedOutput,
};
use crate::system::codec::{decoder, StreamEncoder};
use crate::system::job::{CreateTarget, ExtractTarget, JobContext};
use crate::utils::error::{ArcJobsError, Result};
use crate::utils::paths::{archive_display_path, sanitize_extract_path};

/// 진행률은 읽은 (압축된) 바이트 기준. 전체는 아카이브 파일 크기.
pub fn extract_tar_file(
    target: &ExtractTarget,
    codec: Option<Codec>,
    ctx: &JobContext,
) -> Result<()> {
    let path = target.archive.as_path();
    let file = File::open(path).map_err(ArcJobsError::from_io)?;
    let size = file.metadata().map_err(ArcJobsError::from_io)?.len();
    let out_dir = prepare_output_dir(&target.destination, path)?;
    ctx.progress().set_total(size);

    let counted = ProgressReader::new(file, ctx);
    let reader: Box<dyn Read + '_> = match codec {
        Some(codec) => decoder(codec, counted)?,
        None => Box::new(counted),
    };
    extract_tar_entries(TarArchive::new(reader), path, &out_dir, ctx)?;
    debug!(dir = %out_dir.display(), "tar extracted");
    Ok(())
}

fn extract_tar_entries<R: Read>(
    mut archive: TarArchive<R>,
    path: &Path,
    out_dir: &Path,
    ctx: &JobContext,
) -> Result<()> {
    let corrupt = |e: io::Error| {
        if ctx.cancel_observed() {
            ArcJobsError::Cancelled
        } else {
            ArcJobsError::ArchiveExtractFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    };

    for entry_result in archive.entries().map_err(corrupt)? {
        ctx.checkpoint()?;
        let mut entry = entry_result.map_err(corrupt)?;
        let raw_path = entry.path().map_err(corrupt)?.into_owned();
        let name = archive_display_path(&raw_path);
        let dest_path = sanitize_extract_path(out_dir, &raw_path).ok_or_else(|| {
            ArcJobsError::ArchiveExtractFailed {
                path: path.to_path_buf(),
                reason: format!("{}: blocked unsafe path", raw_path.display()),
            }
        })?;

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&dest_path).map_err(ArcJobsError::from_io)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                let mut partial = PartialFile::create(&dest_path)?;
                if let Some(out) = partial.file_mut() {
                    copy_with_checkpoints(&mut entry, out, ctx, |_| {})
                        .map_err(|e| e.into_error(&corrupt))?;
                }
                partial.commit()?;
            }
            // 링크 등은 tar가 경로 검사를 하며 푼다
            other => {
                let unpacked = entry.unpack_in(out_dir).map_err(ArcJobsError::from_io)?;
                if !unpacked {
                    debug!(entry = %name, kind = ?other, "tar entry skipped");
                }
            }
        }
    }
    Ok(())
}

/// 진행률은 원본 바이트 기준
pub fn create_tar(
    target: &CreateTarget,
    compression: TarCompression,
    ctx: &JobContext,
) -> Result<PathBuf> {
    let items = collect_source_items(&target.sources)?;
    ctx.progress().set_total(total_source_bytes(&items));
    let mut staged = StagedOutput::create(target.output_path())?;

    match compression.codec() {
        None => {
            write_tar(staged.file_mut(), &items, ctx)?;
        }
        Some(codec) => {
            let encoder = StreamEncoder::new(codec, codec.default_level(), None, staged.file_mut())?;
            let encoder = write_tar(encoder, &items, ctx)?;
            encoder.finish().map_err(ArcJobsError::from_io)?;
        }
    }
    debug!(compression = compression.name(), items = items.len(), "tar written");
    staged.persist()
}

fn write_tar<W: Write>(writer: W, items: &[SourceItem], ctx: &JobContext) -> Result<W> {
    let mut builder = TarBuilder::new(writer);
    for item in items {
        ctx.checkpoint()?;
        let name = archive_display_path(Path::new(&item.entry_name));
        if item.is_dir {
            builder
                .append_dir(&name, &item.source_path)
                .map_err(|e| ctx.map_io(e))?;
            continue;
        }

        let file = File::open(&item.source_path).map_err(ArcJobsError::from_io)?;
        let metadata = file.metadata().map_err(ArcJobsError::from_io)?;
        let mut header = Header::new_gnu();
        header.set_metadata(&metadata);
        header.set_size(metadata.len());
        builder
            .append_data(&mut header, &name, ProgressReader::new(file, ctx))
            .map_err(|e| ctx.map_io(e))?;
    }
    builder.into_inner().map_err(|e| ctx.map_io(e))
}
