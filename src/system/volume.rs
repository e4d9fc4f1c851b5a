//! 번호가 붙은 볼륨 파일(`<base>.<ext>.NNN`)을 하나의 스트림으로 읽고,
//! 반대로 하나의 파일을 볼륨으로 자른다.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::system::job::{CancelProbe, JobContext};
use crate::utils::error::{ArcJobsError, Result};
use crate::utils::paths::{parse_volume_name, volume_path};

pub const SEVENZ_VOLUME_EXTENSION: &str = "7z";
pub const ZIP_VOLUME_EXTENSION: &str = "zip";

/// 디렉토리에서 찾은 볼륨 묶음. 가장 큰 번호를 전체 개수로 본다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSet {
    dir: PathBuf,
    base: String,
    extension: String,
    count: u32,
}

impl VolumeSet {
    pub fn discover(first_volume: &Path, extension: &str) -> Result<Self> {
        let file_name = first_volume
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArcJobsError::BadInput(format!("invalid volume name: {}", first_volume.display())))?;
        let (base, _) = parse_volume_name(file_name, extension).ok_or_else(|| {
            ArcJobsError::BadInput(format!("not a volume: {}", first_volume.display()))
        })?;
        let dir = first_volume
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let mut count = 0u32;
        for entry in fs::read_dir(&dir).map_err(ArcJobsError::from_io)? {
            let entry = entry.map_err(ArcJobsError::from_io)?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some((other_base, index)) = parse_volume_name(name, extension) {
                if other_base == base {
                    count = count.max(index);
                }
            }
        }
        if count == 0 {
            return Err(ArcJobsError::MissingVolume {
                path: first_volume.to_path_buf(),
            });
        }

        debug!(base, extension, count, "volume set discovered");
        Ok(Self {
            dir,
            base: base.to_string(),
            extension: extension.to_string(),
            count,
        })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// 1부터 시작하는 번호의 볼륨 경로
    pub fn path(&self, index: u32) -> PathBuf {
        volume_path(&self.dir, &self.base, &self.extension, index)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        (1..=self.count).map(|i| self.path(i)).collect()
    }
}

struct OpenVolume {
    index: usize,
    file: File,
    offset: u64,
}

/// 볼륨들을 이어 붙인 Read + Seek 스트림.
/// 볼륨은 필요할 때 열고, 볼륨 경계를 넘을 때마다 취소를 확인한다.
pub struct MultiVolumeReader {
    paths: Vec<PathBuf>,
    sizes: Vec<Option<u64>>,
    current: Option<OpenVolume>,
    position: u64,
    probe: CancelProbe,
    missing: Option<PathBuf>,
}

impl MultiVolumeReader {
    pub fn new(set: &VolumeSet, probe: CancelProbe) -> Self {
        let paths = set.paths();
        Self {
            sizes: vec![None; paths.len()],
            paths,
            current: None,
            position: 0,
            probe,
            missing: None,
        }
    }

    /// 읽는 도중 없다고 확인된 볼륨
    pub fn missing_volume(&self) -> Option<&Path> {
        self.missing.as_deref()
    }

    /// 드라이버 오류를 볼륨 누락 / 취소 기준으로 다시 분류한다
    pub fn classify(&self, error: ArcJobsError) -> ArcJobsError {
        if self.probe.observed() {
            return ArcJobsError::Cancelled;
        }
        match &self.missing {
            Some(path) => ArcJobsError::MissingVolume { path: path.clone() },
            None => error,
        }
    }

    fn volume_size(&mut self, index: usize) -> io::Result<u64> {
        if let Some(size) = self.sizes[index] {
            return Ok(size);
        }
        let path = &self.paths[index];
        match fs::metadata(path) {
            Ok(meta) => {
                self.sizes[index] = Some(meta.len());
                Ok(meta.len())
            }
            Err(e) => Err(self.record_missing(index, e)),
        }
    }

    fn record_missing(&mut self, index: usize, error: io::Error) -> io::Error {
        if error.kind() == ErrorKind::NotFound {
            let path = self.paths[index].clone();
            warn!(path = %path.display(), "volume missing");
            let message = format!("missing volume: {}", path.display());
            self.missing = Some(path);
            return io::Error::new(ErrorKind::NotFound, message);
        }
        error
    }

    fn total_len(&mut self) -> io::Result<u64> {
        let mut total = 0u64;
        for index in 0..self.paths.len() {
            total += self.volume_size(index)?;
        }
        Ok(total)
    }

    /// 위치가 속한 (볼륨, 볼륨 내 오프셋). 끝을 넘으면 None
    fn locate(&mut self, position: u64) -> io::Result<Option<(usize, u64)>> {
        let mut start = 0u64;
        for index in 0..self.paths.len() {
            let size = self.volume_size(index)?;
            if position < start + size {
                return Ok(Some((index, position - start)));
            }
            start += size;
        }
        Ok(None)
    }

    fn open(&mut self, index: usize, offset: u64) -> io::Result<()> {
        let switching = self.current.as_ref().map_or(true, |c| c.index != index);
        if switching {
            if self.probe.should_cancel() {
                return Err(io::Error::other("job cancelled"));
            }
            let path = self.paths[index].clone();
            let file = File::open(&path).map_err(|e| self.record_missing(index, e))?;
            debug!(volume = %path.display(), "volume opened");
            self.current = Some(OpenVolume {
                index,
                file,
                offset: 0,
            });
        }
        if let Some(current) = self.current.as_mut() {
            if current.offset != offset {
                current.file.seek(SeekFrom::Start(offset))?;
                current.offset = offset;
            }
        }
        Ok(())
    }
}

impl Read for MultiVolumeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let Some((index, offset)) = self.locate(self.position)? else {
            return Ok(0);
        };
        self.open(index, offset)?;
        let size = self.volume_size(index)?;
        let remaining = (size - offset).min(buf.len() as u64) as usize;
        let Some(current) = self.current.as_mut() else {
            return Ok(0);
        };
        let n = current.file.read(&mut buf[..remaining])?;
        if n == 0 {
            // 크기를 잰 뒤 볼륨이 줄어든 경우
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("volume truncated: {}", self.paths[index].display()),
            ));
        }
        current.offset += n as u64;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for MultiVolumeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.total_len()?.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidInput, "seek before start of volume set")
        })?;
        self.position = target;
        Ok(target)
    }
}

/// `source`를 `volume_size` 크기의 볼륨(`<base>.<ext>.001` ...)으로 자른다.
/// 실패하거나 취소되면 만들어 둔 볼륨을 지운다.
pub fn split_into_volumes(
    source: &Path,
    dir: &Path,
    base: &str,
    extension: &str,
    volume_size: u64,
    ctx: &JobContext,
) -> Result<Vec<PathBuf>> {
    if volume_size == 0 {
        return Err(ArcJobsError::BadInput("volume size must be positive".to_string()));
    }
    let first = volume_path(dir, base, extension, 1);
    if first.symlink_metadata().is_ok() {
        return Err(ArcJobsError::DestinationExists { path: first });
    }

    let mut created = Vec::new();
    let result = write_volumes(source, dir, base, extension, volume_size, ctx, &mut created);
    if result.is_err() {
        for path in &created {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove volume");
            }
        }
    }
    result.map(|_| created)
}

fn write_volumes(
    source: &Path,
    dir: &Path,
    base: &str,
    extension: &str,
    volume_size: u64,
    ctx: &JobContext,
    created: &mut Vec<PathBuf>,
) -> Result<()> {
    let mut input = File::open(source).map_err(ArcJobsError::from_io)?;
    let total = input.metadata().map_err(ArcJobsError::from_io)?.len();
    let mut buf = vec![0u8; ctx.buffer_size()];
    let mut written_total = 0u64;
    let mut index = 1u32;

    while written_total < total || index == 1 {
        ctx.checkpoint()?;
        let path = volume_path(dir, base, extension, index);
        let mut out = File::options()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    ArcJobsError::DestinationExists { path: path.clone() }
                } else {
                    ArcJobsError::from_io(e)
                }
            })?;
        created.push(path);

        let mut in_volume = 0u64;
        while in_volume < volume_size {
            let want = (volume_size - in_volume).min(buf.len() as u64) as usize;
            let n = match input.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ArcJobsError::from_io(e)),
            };
            out.write_all(&buf[..n]).map_err(ArcJobsError::from_io)?;
            in_volume += n as u64;
        }
        out.sync_all().map_err(ArcJobsError::from_io)?;
        written_total += in_volume;
        if in_volume == 0 {
            break;
        }
        index += 1;
    }
    debug!(volumes = created.len(), bytes = written_total, "split complete");
    Ok(())
}
