//! zip 드라이버: 단일 파일 / 분할 볼륨 해제, 일반 / 분할 생성

use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::result::ZipError;
use zip::unstable::write::FileOptionsExt;
use zip::write::{FileOptions, SimpleFileOptions};
use zip::{AesMode, CompressionMethod, ZipArchive, ZipWriter};

use crate::models::request::{AesKeyStrength, ZipEncryption, ZipMethod, ZipOptions};
use crate::system::archive::{
    collect_source_items, copy_with_checkpoints, prepare_output_dir, staging_file,
    total_source_bytes, PartialFile, SourceItem, StagedOutput,
};
use crate::system::job::{CreateTarget, ExtractTarget, JobContext};
use crate::system::volume::{split_into_volumes, MultiVolumeReader, VolumeSet};
use crate::utils::error::{ArcJobsError, Result};
use crate::utils::paths::{archive_display_path, sanitize_extract_path, volume_path};

pub const ZIP_EXTENSION: &str = "zip";

/// 이 크기 이상이면 ZIP64 헤더로 쓴다
const LARGE_FILE_THRESHOLD: u64 = u32::MAX as u64;

pub fn extract_zip_file(target: &ExtractTarget, ctx: &JobContext) -> Result<()> {
    let file = File::open(&target.archive).map_err(ArcJobsError::from_io)?;
    extract_zip(file, target, ctx)
}

/// `<base>.zip.001`부터 이어 읽는다
pub fn extract_zip_volumes(target: &ExtractTarget, ctx: &JobContext) -> Result<()> {
    let set = VolumeSet::discover(&target.archive, ZIP_EXTENSION)?;
    debug!(volumes = set.count(), "extracting split zip");
    let mut reader = MultiVolumeReader::new(&set, ctx.probe().clone());
    extract_zip(&mut reader, target, ctx).map_err(|e| reader.classify(e))
}

fn extract_zip<R: Read + Seek>(reader: R, target: &ExtractTarget, ctx: &JobContext) -> Result<()> {
    let path = target.archive.as_path();
    let password = target.password.as_deref();
    let mut archive =
        ZipArchive::new(reader).map_err(|e| map_zip_extract_error(path, e, password))?;
    let out_dir = prepare_output_dir(&target.destination, path)?;
    ctx.progress().set_total(archive.len() as u64);

    for idx in 0..archive.len() {
        ctx.checkpoint()?;
        let mut entry = match password {
            Some(pass) => archive.by_index_decrypt(idx, pass.as_bytes()),
            None => archive.by_index(idx),
        }
        .map_err(|e| map_zip_extract_error(path, e, password))?;

        let name = entry.name().to_string();
        let dest_path = sanitize_extract_path(&out_dir, Path::new(&name)).ok_or_else(|| {
            ArcJobsError::ArchiveExtractFailed {
                path: path.to_path_buf(),
                reason: format!("{}: blocked unsafe path", name),
            }
        })?;

        if entry.is_dir() {
            fs::create_dir_all(&dest_path).map_err(ArcJobsError::from_io)?;
        } else {
            let mut partial = PartialFile::create(&dest_path)?;
            if let Some(out) = partial.file_mut() {
                copy_with_checkpoints(&mut entry, out, ctx, |_| {})
                    .map_err(|e| e.into_error(|io| map_zip_read_error(path, &name, io, password)))?;
            }
            partial.commit()?;
        }
        ctx.progress().advance();
    }
    debug!(entries = archive.len(), dir = %out_dir.display(), "zip extracted");
    Ok(())
}

pub fn create_zip(target: &CreateTarget, options: &ZipOptions, ctx: &JobContext) -> Result<PathBuf> {
    let items = collect_source_items(&target.sources)?;
    ctx.progress().set_total(total_source_bytes(&items));
    let mut staged = StagedOutput::create(target.output_path())?;
    let output = staged.target().to_path_buf();
    write_zip(
        staged.file_mut(),
        &output,
        &items,
        options,
        target.password.as_deref(),
        ctx,
    )?;
    staged.persist()
}

/// 임시 파일에 zip을 만든 뒤 `<name>.zip.NNN` 볼륨으로 자른다.
/// 볼륨을 순서대로 이어 붙이면 원래 zip과 같다.
pub fn create_split_zip(
    target: &CreateTarget,
    options: &ZipOptions,
    split_size: u64,
    ctx: &JobContext,
) -> Result<Vec<PathBuf>> {
    let base = strip_extension(&target.file_name, ZIP_EXTENSION);
    let first = volume_path(&target.destination, base, ZIP_EXTENSION, 1);
    if first.symlink_metadata().is_ok() {
        return Err(ArcJobsError::DestinationExists { path: first });
    }

    let items = collect_source_items(&target.sources)?;
    ctx.progress().set_total(total_source_bytes(&items));
    let mut staging = staging_file(&target.destination)?;
    write_zip(
        staging.as_file_mut(),
        &target.output_path(),
        &items,
        options,
        target.password.as_deref(),
        ctx,
    )?;

    let volumes = split_into_volumes(
        staging.path(),
        &target.destination,
        base,
        ZIP_EXTENSION,
        split_size,
        ctx,
    )?;
    debug!(volumes = volumes.len(), split_size, "split zip written");
    Ok(volumes)
}

fn write_zip<W: Write + Seek>(
    writer: W,
    output: &Path,
    items: &[SourceItem],
    options: &ZipOptions,
    password: Option<&str>,
    ctx: &JobContext,
) -> Result<W> {
    let create_failed = |e: ZipError| match e {
        ZipError::Io(io) => ArcJobsError::from_io(io),
        other => ArcJobsError::ArchiveCreateFailed {
            path: output.to_path_buf(),
            reason: other.to_string(),
        },
    };

    let mut zip = ZipWriter::new(writer);
    let base_options = file_options(options, password)?;
    for item in items {
        ctx.checkpoint()?;
        let mut name = archive_display_path(Path::new(&item.entry_name));
        if item.is_dir {
            if !name.ends_with('/') {
                name.push('/');
            }
            zip.add_directory(name, base_options)
                .map_err(create_failed)?;
            continue;
        }

        let entry_options = base_options.large_file(item.size >= LARGE_FILE_THRESHOLD);
        zip.start_file(name, entry_options).map_err(create_failed)?;
        let mut src = File::open(&item.source_path).map_err(ArcJobsError::from_io)?;
        copy_with_checkpoints(&mut src, &mut zip, ctx, |n| ctx.progress().advance_by(n))
            .map_err(|e| e.into_error(ArcJobsError::from_io))?;
    }
    zip.finish().map_err(create_failed)
}

fn file_options<'k>(options: &ZipOptions, password: Option<&'k str>) -> Result<FileOptions<'k, ()>> {
    let method = compression_method(options.method);
    let level = match options.method {
        ZipMethod::Store => None,
        _ => Some(options.level.value()),
    };
    let file_options = SimpleFileOptions::default()
        .compression_method(method)
        .compression_level(level);

    match (options.encryption_for(password), password) {
        (ZipEncryption::Aes, Some(pass)) => {
            Ok(file_options.with_aes_encryption(aes_mode(options.key_strength), pass))
        }
        (ZipEncryption::ZipStandard, Some(pass)) => {
            Ok(file_options.with_deprecated_encryption(pass.as_bytes()))
        }
        (ZipEncryption::None, Some(_)) => Err(ArcJobsError::BadInput(
            "password given but zip encryption is disabled".to_string(),
        )),
        _ => Ok(file_options),
    }
}

fn compression_method(method: ZipMethod) -> CompressionMethod {
    match method {
        ZipMethod::Store => CompressionMethod::Stored,
        ZipMethod::Deflate => CompressionMethod::Deflated,
        ZipMethod::Bzip2 => CompressionMethod::Bzip2,
        ZipMethod::Zstd => CompressionMethod::Zstd,
    }
}

fn aes_mode(strength: AesKeyStrength) -> AesMode {
    match strength {
        AesKeyStrength::Aes128 => AesMode::Aes128,
        AesKeyStrength::Aes192 => AesMode::Aes192,
        AesKeyStrength::Aes256 => AesMode::Aes256,
    }
}

fn strip_extension<'a>(file_name: &'a str, extension: &str) -> &'a str {
    let cut = file_name.len().saturating_sub(extension.len() + 1);
    match file_name.get(cut..) {
        Some(suffix) if suffix.eq_ignore_ascii_case(&format!(".{}", extension)) => {
            &file_name[..cut]
        }
        _ => file_name,
    }
}

fn map_zip_extract_error(path: &Path, error: ZipError, password: Option<&str>) -> ArcJobsError {
    match error {
        ZipError::UnsupportedArchive(detail)
            if detail == ZipError::PASSWORD_REQUIRED && password.is_none() =>
        {
            ArcJobsError::ArchivePasswordRequired {
                path: path.to_path_buf(),
            }
        }
        ZipError::InvalidPassword => ArcJobsError::ArchiveInvalidPassword {
            path: path.to_path_buf(),
            reason: "Invalid ZIP password".to_string(),
        },
        ZipError::UnsupportedArchive(detail)
            if password.is_some() && detail.to_ascii_lowercase().contains("password") =>
        {
            ArcJobsError::ArchiveInvalidPassword {
                path: path.to_path_buf(),
                reason: detail.to_string(),
            }
        }
        ZipError::Io(e) => match ArcJobsError::from_io(e) {
            ArcJobsError::Io(e) => ArcJobsError::ArchiveExtractFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
            classified => classified,
        },
        other => ArcJobsError::ArchiveExtractFailed {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    }
}

/// 엔트리 본문을 읽다 실패. 암호화된 경우 비밀번호 오류와 손상을 구분할 수 없다.
fn map_zip_read_error(
    path: &Path,
    entry: &str,
    error: io::Error,
    password: Option<&str>,
) -> ArcJobsError {
    if password.is_some() {
        ArcJobsError::ArchiveInvalidPassword {
            path: path.to_path_buf(),
            reason: format!("{}: wrong password or corrupt data ({})", entry, error),
        }
    } else {
        ArcJobsError::ArchiveExtractFailed {
            path: path.to_path_buf(),
            reason: format!("{}: {}", entry, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::job::test_support::context;
    use tempfile::tempdir;

    fn prepare_sources(base: &Path) -> Vec<PathBuf> {
        let file_path = base.join("alpha.txt");
        let nested_dir = base.join("nested");
        fs::create_dir_all(&nested_dir).expect("create nested dir");
        fs::write(&file_path, b"alpha").expect("write alpha");
        fs::write(nested_dir.join("beta.txt"), b"beta beta beta").expect("write beta");
        vec![file_path, nested_dir]
    }

    fn create_target(dest: &Path, sources: Vec<PathBuf>, password: Option<&str>) -> CreateTarget {
        CreateTarget {
            sources,
            destination: dest.to_path_buf(),
            file_name: "sample.zip".to_string(),
            password: password.map(str::to_string),
        }
    }

    fn extract_target(archive: PathBuf, dest: &Path, password: Option<&str>) -> ExtractTarget {
        ExtractTarget {
            archive,
            destination: dest.to_path_buf(),
            password: password.map(str::to_string),
        }
    }

    #[test]
    fn test_zip_create_extract_roundtrip() {
        let temp = tempdir().expect("create tempdir");
        let src_dir = temp.path().join("src");
        fs::create_dir_all(&src_dir).expect("create src dir");
        let sources = prepare_sources(&src_dir);
        let (ctx, _handle) = context();

        let archive = create_zip(
            &create_target(temp.path(), sources, None),
            &ZipOptions::default(),
            &ctx,
        )
        .expect("create zip");
        assert_eq!(archive, temp.path().join("sample.zip"));
        assert_eq!(ctx.progress().snapshot().completed, 19);

        let dest = temp.path().join("dest");
        let (ctx, _handle) = context();
        extract_zip_file(&extract_target(archive, &dest, None), &ctx).expect("extract zip");
        let out = dest.join("sample");
        assert_eq!(fs::read(out.join("alpha.txt")).expect("read alpha"), b"alpha");
        assert_eq!(
            fs::read(out.join("nested").join("beta.txt")).expect("read beta"),
            b"beta beta beta"
        );
        let progress = ctx.progress().snapshot();
        assert_eq!(progress.total, 3);
        assert_eq!(progress.completed, 3);
    }

    #[test]
    fn test_create_zip_refuses_existing_output() {
        let temp = tempdir().expect("create tempdir");
        let src = temp.path().join("a.txt");
        fs::write(&src, b"a").expect("write source");
        fs::write(temp.path().join("sample.zip"), b"old").expect("write existing");
        let (ctx, _handle) = context();

        let result = create_zip(
            &create_target(temp.path(), vec![src], None),
            &ZipOptions::default(),
            &ctx,
        );
        assert!(matches!(result, Err(ArcJobsError::DestinationExists { .. })));
        assert_eq!(
            fs::read(temp.path().join("sample.zip")).expect("read existing"),
            b"old"
        );
    }

    #[test]
    fn test_zip_password_errors() {
        for encryption in [ZipEncryption::Aes, ZipEncryption::ZipStandard] {
            let temp = tempdir().expect("create tempdir");
            let src = temp.path().join("secret.txt");
            fs::write(&src, b"top-secret").expect("write source");
            let options = ZipOptions {
                encryption,
                ..ZipOptions::default()
            };
            let (ctx, _handle) = context();
            let archive = create_zip(
                &create_target(temp.path(), vec![src], Some("correct-password")),
                &options,
                &ctx,
            )
            .expect("create encrypted zip");

            let (ctx, _handle) = context();
            let missing = extract_zip_file(
                &extract_target(archive.clone(), &temp.path().join("none"), None),
                &ctx,
            );
            assert!(matches!(
                missing,
                Err(ArcJobsError::ArchivePasswordRequired { .. })
            ));

            let (ctx, _handle) = context();
            let wrong = extract_zip_file(
                &extract_target(archive.clone(), &temp.path().join("wrong"), Some("nope")),
                &ctx,
            );
            assert!(matches!(
                wrong,
                Err(ArcJobsError::ArchiveInvalidPassword { .. })
            ));

            let (ctx, _handle) = context();
            let ok_dest = temp.path().join("ok");
            extract_zip_file(
                &extract_target(archive, &ok_dest, Some("correct-password")),
                &ctx,
            )
            .expect("extract with password");
            assert_eq!(
                fs::read(ok_dest.join("sample").join("secret.txt")).expect("read secret"),
                b"top-secret"
            );
        }
    }

    #[test]
    fn test_extract_zip_rejects_zip_slip() {
        let temp = tempdir().expect("create tempdir");
        let archive_path = temp.path().join("unsafe.zip");
        let file = File::create(&archive_path).expect("create zip file");
        let mut writer = ZipWriter::new(file);
        writer
            .start_file("../evil.txt", SimpleFileOptions::default())
            .expect("start evil file");
        writer.write_all(b"evil").expect("write evil");
        writer.finish().expect("finish zip");

        let (ctx, _handle) = context();
        let result = extract_zip_file(&extract_target(archive_path, temp.path(), None), &ctx);
        assert!(matches!(
            result,
            Err(ArcJobsError::ArchiveExtractFailed { .. })
        ));
        assert!(!temp.path().join("evil.txt").exists());
    }

    #[test]
    fn test_split_zip_volumes_concatenate_to_zip() {
        let temp = tempdir().expect("create tempdir");
        let src = temp.path().join("data.bin");
        let data = (0..150_000u32)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
            .collect::<Vec<_>>();
        fs::write(&src, &data).expect("write data");
        let dest = temp.path().join("out");
        let options = ZipOptions {
            method: ZipMethod::Store,
            ..ZipOptions::default()
        };
        let (ctx, _handle) = context();

        let volumes = create_split_zip(
            &create_target(&dest, vec![src], None),
            &options,
            64 * 1024,
            &ctx,
        )
        .expect("create split zip");
        assert_eq!(volumes.len(), 3);
        assert_eq!(volumes[0], dest.join("sample.zip.001"));
        let leftovers = fs::read_dir(&dest)
            .expect("list dest")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .count();
        assert_eq!(leftovers, 0);

        let (ctx, _handle) = context();
        let extract_dest = temp.path().join("extracted");
        extract_zip_volumes(
            &extract_target(dest.join("sample.zip.001"), &extract_dest, None),
            &ctx,
        )
        .expect("extract split zip");
        assert_eq!(
            fs::read(extract_dest.join("sample").join("data.bin")).expect("read data"),
            data
        );
    }

    #[test]
    fn test_strip_extension() {
        assert_eq!(strip_extension("backup.zip", "zip"), "backup");
        assert_eq!(strip_extension("backup.ZIP", "zip"), "backup");
        assert_eq!(strip_extension("backup", "zip"), "backup");
    }
}
