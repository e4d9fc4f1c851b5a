//! 단일 스트림 코덱 (gzip / bzip2 / xz / lzma / zstd / lz4 / snappy)

use bzip2::read::MultiBzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use lz4_flex::frame::{FrameDecoder as Lz4Decoder, FrameEncoder as Lz4Encoder};
use snap::read::FrameDecoder as SnappyDecoder;
use snap::write::FrameEncoder as SnappyEncoder;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use xz2::read::XzDecoder;
use xz2::stream::{Check, LzmaOptions, MtStreamBuilder, Stream};
use xz2::write::XzEncoder;
use zstd::stream::read::Decoder as ZstdDecoder;
use zstd::stream::write::Encoder as ZstdEncoder;

use crate::models::request::{Codec, CodecOptions};
use crate::system::archive::{
    copy_with_checkpoints, with_extension, PartialFile, ProgressReader, StagedOutput,
};
use crate::system::job::{ExtractTarget, JobContext};
use crate::utils::error::{ArcJobsError, Result};
use crate::utils::paths::resolve_collision_free_file;

const DEFAULT_STREAM_NAME: &str = "output";

/// 압축 해제 리더. 이어 붙인 gzip / bzip2 / xz 멤버도 끝까지 읽는다.
pub fn decoder<'a, R: Read + 'a>(codec: Codec, reader: R) -> Result<Box<dyn Read + 'a>> {
    let decoder: Box<dyn Read + 'a> = match codec {
        Codec::Gzip => Box::new(MultiGzDecoder::new(reader)),
        Codec::Bzip2 => Box::new(MultiBzDecoder::new(reader)),
        Codec::Xz => Box::new(XzDecoder::new_multi_decoder(reader)),
        Codec::Lzma => {
            let stream = Stream::new_lzma_decoder(u64::MAX)
                .map_err(|e| ArcJobsError::from_io(e.into()))?;
            Box::new(XzDecoder::new_stream(reader, stream))
        }
        Codec::Zstd => Box::new(ZstdDecoder::new(reader).map_err(ArcJobsError::from_io)?),
        Codec::Lz4 => Box::new(Lz4Decoder::new(reader)),
        Codec::Snappy => Box::new(SnappyDecoder::new(reader)),
    };
    Ok(decoder)
}

/// 압축 쓰기. 마지막에 `finish`로 스트림을 닫아야 한다.
pub enum StreamEncoder<W: Write> {
    Gzip(GzEncoder<W>),
    Bzip2(BzEncoder<W>),
    Xz(XzEncoder<W>),
    Zstd(ZstdEncoder<'static, W>),
    Lz4(Lz4Encoder<W>),
    Snappy(SnappyEncoder<W>),
}

impl<W: Write> StreamEncoder<W> {
    /// `threads`는 xz에서만 쓰인다 (2 이상이면 멀티스레드 인코더)
    pub fn new(codec: Codec, level: u32, threads: Option<u32>, writer: W) -> Result<Self> {
        let bad_level = || {
            ArcJobsError::BadInput(format!("{} level out of range: {}", codec, level))
        };
        let encoder = match codec {
            Codec::Gzip => {
                if level > 9 {
                    return Err(bad_level());
                }
                StreamEncoder::Gzip(GzEncoder::new(writer, flate2::Compression::new(level)))
            }
            Codec::Bzip2 => {
                let compression = bzip2::Compression::try_new(level).ok_or_else(bad_level)?;
                StreamEncoder::Bzip2(BzEncoder::new(writer, compression))
            }
            Codec::Xz => {
                let stream = match threads {
                    Some(n) if n > 1 => MtStreamBuilder::new()
                        .threads(n)
                        .preset(level)
                        .check(Check::Crc64)
                        .encoder(),
                    _ => Stream::new_easy_encoder(level, Check::Crc64),
                }
                .map_err(|e| ArcJobsError::from_io(e.into()))?;
                StreamEncoder::Xz(XzEncoder::new_stream(writer, stream))
            }
            Codec::Lzma => {
                let stream = LzmaOptions::new_preset(level)
                    .and_then(|options| Stream::new_lzma_encoder(&options))
                    .map_err(|e| ArcJobsError::from_io(e.into()))?;
                StreamEncoder::Xz(XzEncoder::new_stream(writer, stream))
            }
            Codec::Zstd => {
                let level = i32::try_from(level).map_err(|_| bad_level())?;
                StreamEncoder::Zstd(ZstdEncoder::new(writer, level).map_err(ArcJobsError::from_io)?)
            }
            Codec::Lz4 | Codec::Snappy if level != 0 => return Err(bad_level()),
            Codec::Lz4 => StreamEncoder::Lz4(Lz4Encoder::new(writer)),
            Codec::Snappy => StreamEncoder::Snappy(SnappyEncoder::new(writer)),
        };
        Ok(encoder)
    }

    pub fn finish(self) -> io::Result<W> {
        match self {
            StreamEncoder::Gzip(e) => e.finish(),
            StreamEncoder::Bzip2(e) => e.finish(),
            StreamEncoder::Xz(e) => e.finish(),
            StreamEncoder::Zstd(e) => e.finish(),
            StreamEncoder::Lz4(e) => e.finish().map_err(io::Error::from),
            StreamEncoder::Snappy(e) => e
                .into_inner()
                .map_err(|e| io::Error::new(e.error().kind(), e.error().to_string())),
        }
    }
}

impl<W: Write> Write for StreamEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            StreamEncoder::Gzip(e) => e.write(buf),
            StreamEncoder::Bzip2(e) => e.write(buf),
            StreamEncoder::Xz(e) => e.write(buf),
            StreamEncoder::Zstd(e) => e.write(buf),
            StreamEncoder::Lz4(e) => e.write(buf),
            StreamEncoder::Snappy(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            StreamEncoder::Gzip(e) => e.flush(),
            StreamEncoder::Bzip2(e) => e.flush(),
            // raw LZMA 인코더는 FullFlush를 지원하지 않는다. 스트림은 finish에서 마무리한다.
            StreamEncoder::Xz(e) => e.get_mut().flush(),
            StreamEncoder::Zstd(e) => e.flush(),
            StreamEncoder::Lz4(e) => e.flush(),
            StreamEncoder::Snappy(e) => e.flush(),
        }
    }
}

/// 압축 스트림 하나를 `destination/<이름에서 확장자를 뗀 것>`으로 푼다 (충돌 시 `_1` ...).
/// 진행률은 읽은 압축 바이트 기준.
pub fn extract_stream(target: &ExtractTarget, codec: Codec, ctx: &JobContext) -> Result<PathBuf> {
    let path = target.archive.as_path();
    let file = File::open(path).map_err(ArcJobsError::from_io)?;
    let size = file.metadata().map_err(ArcJobsError::from_io)?.len();

    fs::create_dir_all(&target.destination).map_err(ArcJobsError::from_io)?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_STREAM_NAME.to_string());
    let out_path = resolve_collision_free_file(&target.destination, &stem);

    ctx.progress().set_total(size);
    let mut reader = decoder(codec, ProgressReader::new(file, ctx))?;
    let mut partial = PartialFile::create(&out_path)?;
    if let Some(out) = partial.file_mut() {
        copy_with_checkpoints(&mut reader, out, ctx, |_| {}).map_err(|e| {
            e.into_error(|io| {
                if ctx.cancel_observed() {
                    ArcJobsError::Cancelled
                } else {
                    ArcJobsError::ArchiveExtractFailed {
                        path: path.to_path_buf(),
                        reason: format!("{} stream: {}", codec, io),
                    }
                }
            })
        })?;
    }
    partial.commit()?;
    debug!(output = %out_path.display(), "stream decoded");
    Ok(out_path)
}

/// 파일 하나를 `destination/<파일 이름>.<확장자>`로 압축한다. 진행률은 읽은 입력 바이트 기준.
pub fn compress_stream(
    source: &Path,
    destination: &Path,
    options: &CodecOptions,
    ctx: &JobContext,
) -> Result<PathBuf> {
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            ArcJobsError::BadInput(format!("invalid source name: {}", source.display()))
        })?;
    let codec = options.codec;
    let target = destination.join(with_extension(&file_name, codec.extension()));

    let mut input = File::open(source).map_err(ArcJobsError::from_io)?;
    let size = input.metadata().map_err(ArcJobsError::from_io)?.len();
    let mut staged = StagedOutput::create(target)?;
    ctx.progress().set_total(size);

    let mut encoder = StreamEncoder::new(
        codec,
        options.effective_level(),
        options.threads,
        staged.file_mut(),
    )?;
    copy_with_checkpoints(&mut input, &mut encoder, ctx, |n| ctx.progress().advance_by(n))
        .map_err(|e| e.into_error(ArcJobsError::from_io))?;
    ctx.checkpoint()?;
    encoder.finish().map_err(ArcJobsError::from_io)?;

    debug!(codec = codec.name(), level = options.effective_level(), "stream compressed");
    staged.persist()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::job::test_support::context;
    use tempfile::tempdir;

    fn sample() -> Vec<u8> {
        b"stream codec sample line\n".repeat(2_000)
    }

    fn extract_target(archive: PathBuf, dest: &Path) -> ExtractTarget {
        ExtractTarget {
            archive,
            destination: dest.to_path_buf(),
            password: None,
        }
    }

    #[test]
    fn test_compress_then_extract_each_codec() {
        for codec in Codec::ALL {
            let temp = tempdir().expect("create tempdir");
            let src = temp.path().join("dump.sql");
            fs::write(&src, sample()).expect("write source");
            let out_dir = temp.path().join("out");
            let options = CodecOptions {
                codec,
                ..CodecOptions::default()
            };

            let (ctx, _handle) = context();
            let compressed =
                compress_stream(&src, &out_dir, &options, &ctx).expect("compress stream");
            assert_eq!(
                compressed,
                out_dir.join(format!("dump.sql.{}", codec.extension()))
            );
            assert_eq!(ctx.progress().snapshot().completed, sample().len() as u64);

            let (ctx, _handle) = context();
            let restored = extract_stream(&extract_target(compressed, &out_dir), codec, &ctx)
                .expect("extract stream");
            assert_eq!(restored, out_dir.join("dump.sql"));
            assert_eq!(fs::read(&restored).expect("read restored"), sample());
        }
    }

    #[test]
    fn test_lzma_compress_finishes_after_flush() {
        let temp = tempdir().expect("create tempdir");
        let src = temp.path().join("table.csv");
        fs::write(&src, sample()).expect("write source");
        let options = CodecOptions {
            codec: Codec::Lzma,
            level: Some(1),
            threads: None,
        };
        let (ctx, _handle) = context();
        let compressed = compress_stream(&src, temp.path(), &options, &ctx).expect("compress lzma");
        assert_eq!(compressed, temp.path().join("table.csv.lzma"));

        let mut restored = Vec::new();
        decoder(Codec::Lzma, File::open(&compressed).expect("open lzma"))
            .expect("lzma decoder")
            .read_to_end(&mut restored)
            .expect("decode lzma");
        assert_eq!(restored, sample());
    }

    #[test]
    fn test_extract_foreign_lz4_and_snappy_frames() {
        let temp = tempdir().expect("create tempdir");

        let mut lz4 = Lz4Encoder::new(Vec::new());
        lz4.write_all(&sample()).expect("write lz4");
        let lz4_path = temp.path().join("events.log.lz4");
        fs::write(&lz4_path, lz4.finish().expect("finish lz4")).expect("write lz4 file");

        let mut snappy = SnappyEncoder::new(Vec::new());
        snappy.write_all(&sample()).expect("write snappy");
        let sz_path = temp.path().join("events.json.sz");
        let framed = match snappy.into_inner() {
            Ok(bytes) => bytes,
            Err(e) => panic!("finish snappy: {}", e.error()),
        };
        fs::write(&sz_path, framed).expect("write sz file");

        let out_dir = temp.path().join("out");
        let (ctx, _handle) = context();
        let restored = extract_stream(&extract_target(lz4_path, &out_dir), Codec::Lz4, &ctx)
            .expect("extract lz4");
        assert_eq!(restored, out_dir.join("events.log"));
        assert_eq!(fs::read(&restored).expect("read lz4 output"), sample());

        let (ctx, _handle) = context();
        let restored = extract_stream(&extract_target(sz_path, &out_dir), Codec::Snappy, &ctx)
            .expect("extract snappy");
        assert_eq!(restored, out_dir.join("events.json"));
        assert_eq!(fs::read(&restored).expect("read snappy output"), sample());
    }

    #[test]
    fn test_levelless_codecs_reject_level() {
        let result = StreamEncoder::new(Codec::Snappy, 3, None, Vec::new());
        assert!(matches!(result, Err(ArcJobsError::BadInput(_))));
        assert!(StreamEncoder::new(Codec::Lz4, 0, None, Vec::new()).is_ok());
    }

    #[test]
    fn test_extract_stream_avoids_collisions() {
        let temp = tempdir().expect("create tempdir");
        let src = temp.path().join("notes.txt");
        fs::write(&src, b"hello").expect("write source");
        let options = CodecOptions {
            codec: Codec::Gzip,
            ..CodecOptions::default()
        };
        let (ctx, _handle) = context();
        let compressed = compress_stream(&src, temp.path(), &options, &ctx).expect("compress");

        let (ctx, _handle) = context();
        let restored = extract_stream(&extract_target(compressed, temp.path()), Codec::Gzip, &ctx)
            .expect("extract");
        assert_eq!(restored, temp.path().join("notes_1.txt"));
        assert_eq!(fs::read(&src).expect("read original"), b"hello");
    }

    #[test]
    fn test_xz_multithreaded_output_is_valid_xz() {
        let temp = tempdir().expect("create tempdir");
        let src = temp.path().join("big.log");
        fs::write(&src, sample()).expect("write source");
        let options = CodecOptions {
            codec: Codec::Xz,
            level: Some(1),
            threads: Some(4),
        };
        let (ctx, _handle) = context();
        let compressed = compress_stream(&src, temp.path(), &options, &ctx).expect("compress");

        let mut restored = Vec::new();
        decoder(Codec::Xz, File::open(&compressed).expect("open xz"))
            .expect("xz decoder")
            .read_to_end(&mut restored)
            .expect("decode xz");
        assert_eq!(restored, sample());
    }

    #[test]
    fn test_corrupt_stream_removes_partial_output() {
        let temp = tempdir().expect("create tempdir");
        let bogus = temp.path().join("broken.gz");
        fs::write(&bogus, b"definitely not gzip").expect("write bogus");
        let out_dir = temp.path().join("out");

        let (ctx, _handle) = context();
        let result = extract_stream(&extract_target(bogus, &out_dir), Codec::Gzip, &ctx);
        assert!(matches!(
            result,
            Err(ArcJobsError::ArchiveExtractFailed { .. })
        ));
        assert!(!out_dir.join("broken").exists());
    }

    #[test]
    fn test_compress_refuses_existing_output() {
        let temp = tempdir().expect("create tempdir");
        let src = temp.path().join("a.txt");
        fs::write(&src, b"a").expect("write source");
        fs::write(temp.path().join("a.txt.zst"), b"old").expect("write existing");
        let options = CodecOptions {
            codec: Codec::Zstd,
            ..CodecOptions::default()
        };
        let (ctx, _handle) = context();
        let result = compress_stream(&src, temp.path(), &options, &ctx);
        assert!(matches!(result, Err(ArcJobsError::DestinationExists { .. })));
    }
}
