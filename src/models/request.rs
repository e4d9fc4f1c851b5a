//! 작업 요청 / 포맷 옵션 모델
//!
//! 요청은 제출 후 바뀌지 않는다. 옵션이 `Default`면 엔진 설정의 기본값을 쓴다.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::models::job::JobKind;
use crate::utils::error::{ArcJobsError, Result};

/// 분할 zip 볼륨 최소 크기 (64 KiB)
pub const MIN_SPLIT_SIZE: u64 = 64 * 1024;

/// 7z 스레드 수 상한
pub const MAX_THREADS: u32 = 256;

fn parse_choice<T: Copy>(what: &str, input: &str, all: &[T], name: fn(&T) -> &'static str) -> Result<T> {
    let wanted = input.trim();
    all.iter()
        .copied()
        .find(|v| name(v).eq_ignore_ascii_case(wanted))
        .ok_or_else(|| {
            let choices = all.iter().map(name).collect::<Vec<_>>().join(", ");
            ArcJobsError::BadInput(format!(
                "unknown {} '{}' (expected one of: {})",
                what, input, choices
            ))
        })
}

/// zip 압축 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZipMethod {
    Store,
    #[default]
    Deflate,
    Bzip2,
    Zstd,
}

impl ZipMethod {
    pub const ALL: [ZipMethod; 4] = [
        ZipMethod::Store,
        ZipMethod::Deflate,
        ZipMethod::Bzip2,
        ZipMethod::Zstd,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ZipMethod::Store => "store",
            ZipMethod::Deflate => "deflate",
            ZipMethod::Bzip2 => "bzip2",
            ZipMethod::Zstd => "zstd",
        }
    }
}

/// zip 압축 수준 (1 ~ 9)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZipLevel {
    Fastest,
    Faster,
    Fast,
    MediumFast,
    #[default]
    Normal,
    Higher,
    Maximum,
    PreUltra,
    Ultra,
}

impl ZipLevel {
    pub const ALL: [ZipLevel; 9] = [
        ZipLevel::Fastest,
        ZipLevel::Faster,
        ZipLevel::Fast,
        ZipLevel::MediumFast,
        ZipLevel::Normal,
        ZipLevel::Higher,
        ZipLevel::Maximum,
        ZipLevel::PreUltra,
        ZipLevel::Ultra,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ZipLevel::Fastest => "fastest",
            ZipLevel::Faster => "faster",
            ZipLevel::Fast => "fast",
            ZipLevel::MediumFast => "medium_fast",
            ZipLevel::Normal => "normal",
            ZipLevel::Higher => "higher",
            ZipLevel::Maximum => "maximum",
            ZipLevel::PreUltra => "pre_ultra",
            ZipLevel::Ultra => "ultra",
        }
    }

    pub fn value(&self) -> i64 {
        match self {
            ZipLevel::Fastest => 1,
            ZipLevel::Faster => 2,
            ZipLevel::Fast => 3,
            ZipLevel::MediumFast => 4,
            ZipLevel::Normal => 5,
            ZipLevel::Higher => 6,
            ZipLevel::Maximum => 7,
            ZipLevel::PreUltra => 8,
            ZipLevel::Ultra => 9,
        }
    }
}

/// zip 암호화 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZipEncryption {
    None,
    /// 구형 ZipCrypto
    ZipStandard,
    #[default]
    Aes,
}

impl ZipEncryption {
    pub const ALL: [ZipEncryption; 3] = [
        ZipEncryption::None,
        ZipEncryption::ZipStandard,
        ZipEncryption::Aes,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ZipEncryption::None => "none",
            ZipEncryption::ZipStandard => "zip_standard",
            ZipEncryption::Aes => "aes",
        }
    }
}

/// AES 키 길이
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AesKeyStrength {
    Aes128,
    Aes192,
    #[default]
    Aes256,
}

impl AesKeyStrength {
    pub const ALL: [AesKeyStrength; 3] = [
        AesKeyStrength::Aes128,
        AesKeyStrength::Aes192,
        AesKeyStrength::Aes256,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AesKeyStrength::Aes128 => "aes128",
            AesKeyStrength::Aes192 => "aes192",
            AesKeyStrength::Aes256 => "aes256",
        }
    }
}

/// tar 외부 압축
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TarCompression {
    #[default]
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl TarCompression {
    pub const ALL: [TarCompression; 5] = [
        TarCompression::None,
        TarCompression::Gzip,
        TarCompression::Bzip2,
        TarCompression::Xz,
        TarCompression::Zstd,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TarCompression::None => "none",
            TarCompression::Gzip => "gzip",
            TarCompression::Bzip2 => "bzip2",
            TarCompression::Xz => "xz",
            TarCompression::Zstd => "zstd",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            TarCompression::None => "tar",
            TarCompression::Gzip => "tar.gz",
            TarCompression::Bzip2 => "tar.bz2",
            TarCompression::Xz => "tar.xz",
            TarCompression::Zstd => "tar.zst",
        }
    }

    pub fn codec(&self) -> Option<Codec> {
        match self {
            TarCompression::None => None,
            TarCompression::Gzip => Some(Codec::Gzip),
            TarCompression::Bzip2 => Some(Codec::Bzip2),
            TarCompression::Xz => Some(Codec::Xz),
            TarCompression::Zstd => Some(Codec::Zstd),
        }
    }
}

/// 단일 스트림 코덱
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    #[default]
    Gzip,
    Bzip2,
    Xz,
    Lzma,
    Zstd,
    /// LZ4 frame 포맷
    Lz4,
    /// Snappy framing 포맷
    Snappy,
}

impl Codec {
    pub const ALL: [Codec; 7] = [
        Codec::Gzip,
        Codec::Bzip2,
        Codec::Xz,
        Codec::Lzma,
        Codec::Zstd,
        Codec::Lz4,
        Codec::Snappy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Gzip => "gzip",
            Codec::Bzip2 => "bzip2",
            Codec::Xz => "xz",
            Codec::Lzma => "lzma",
            Codec::Zstd => "zstd",
            Codec::Lz4 => "lz4",
            Codec::Snappy => "snappy",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Gzip => "gz",
            Codec::Bzip2 => "bz2",
            Codec::Xz => "xz",
            Codec::Lzma => "lzma",
            Codec::Zstd => "zst",
            Codec::Lz4 => "lz4",
            Codec::Snappy => "sz",
        }
    }

    pub fn level_range(&self) -> RangeInclusive<u32> {
        match self {
            Codec::Gzip => 0..=9,
            Codec::Bzip2 => 1..=9,
            Codec::Xz | Codec::Lzma => 0..=9,
            Codec::Zstd => 1..=22,
            // 레벨 없음
            Codec::Lz4 | Codec::Snappy => 0..=0,
        }
    }

    pub fn default_level(&self) -> u32 {
        match self {
            Codec::Gzip | Codec::Xz | Codec::Lzma => 6,
            Codec::Bzip2 => 9,
            Codec::Zstd => 3,
            Codec::Lz4 | Codec::Snappy => 0,
        }
    }

    /// 파일 이름으로 코덱과 tar 포함 여부를 판별한다.
    pub fn detect(path: &Path) -> Option<(Codec, bool)> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        const TABLE: [(&str, Codec, bool); 20] = [
            (".tar.gz", Codec::Gzip, true),
            (".tgz", Codec::Gzip, true),
            (".tar.bz2", Codec::Bzip2, true),
            (".tbz2", Codec::Bzip2, true),
            (".tbz", Codec::Bzip2, true),
            (".tar.xz", Codec::Xz, true),
            (".txz", Codec::Xz, true),
            (".tar.lzma", Codec::Lzma, true),
            (".tlz", Codec::Lzma, true),
            (".tar.zst", Codec::Zstd, true),
            (".tzst", Codec::Zstd, true),
            (".tar.lz4", Codec::Lz4, true),
            (".tar.sz", Codec::Snappy, true),
            (".gz", Codec::Gzip, false),
            (".bz2", Codec::Bzip2, false),
            (".xz", Codec::Xz, false),
            (".lzma", Codec::Lzma, false),
            (".zst", Codec::Zstd, false),
            (".lz4", Codec::Lz4, false),
            (".sz", Codec::Snappy, false),
        ];
        TABLE
            .iter()
            .find(|(suffix, _, _)| name.ends_with(suffix) && name.len() > suffix.len())
            .map(|(_, codec, is_tar)| (*codec, *is_tar))
    }
}

macro_rules! impl_choice_parsing {
    ($($ty:ty => $what:literal),* $(,)?) => {
        $(
            impl FromStr for $ty {
                type Err = ArcJobsError;

                fn from_str(s: &str) -> Result<Self> {
                    parse_choice($what, s, &<$ty>::ALL, <$ty>::name)
                }
            }

            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.name())
                }
            }
        )*
    };
}

impl_choice_parsing!(
    ZipMethod => "zip method",
    ZipLevel => "zip level",
    ZipEncryption => "zip encryption",
    AesKeyStrength => "AES key strength",
    TarCompression => "tar compression",
    Codec => "codec",
);

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZipOptions {
    pub method: ZipMethod,
    pub level: ZipLevel,
    pub encryption: ZipEncryption,
    pub key_strength: AesKeyStrength,
    /// 분할 크기 (바이트). CreateSplitZip 전용
    pub split_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SevenZOptions {
    /// 0 ~ 9
    pub level: u32,
    pub solid: bool,
    /// None = 자동
    pub threads: Option<u32>,
}

impl Default for SevenZOptions {
    fn default() -> Self {
        Self {
            level: 5,
            solid: true,
            threads: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TarOptions {
    pub compression: TarCompression,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecOptions {
    pub codec: Codec,
    /// None = 코덱 기본값
    pub level: Option<u32>,
    /// xz 전용
    pub threads: Option<u32>,
}

/// 포맷별 옵션
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FormatOptions {
    /// 엔진 설정의 기본값 사용
    #[default]
    Default,
    Zip(ZipOptions),
    SevenZ(SevenZOptions),
    Tar(TarOptions),
    Codec(CodecOptions),
}

impl FormatOptions {
    pub fn name(&self) -> &'static str {
        match self {
            FormatOptions::Default => "default",
            FormatOptions::Zip(_) => "zip",
            FormatOptions::SevenZ(_) => "7z",
            FormatOptions::Tar(_) => "tar",
            FormatOptions::Codec(_) => "codec",
        }
    }
}

impl ZipOptions {
    pub fn validate(&self, kind: JobKind, password: Option<&str>) -> Result<()> {
        match (kind, self.split_size) {
            (JobKind::CreateSplitZip, None) => {
                return Err(ArcJobsError::BadInput(
                    "split zip requires a split size".to_string(),
                ))
            }
            (JobKind::CreateSplitZip, Some(size)) if size < MIN_SPLIT_SIZE => {
                return Err(ArcJobsError::BadInput(format!(
                    "split size must be at least {} bytes, got {}",
                    MIN_SPLIT_SIZE, size
                )))
            }
            (JobKind::CreateZip, Some(_)) => {
                return Err(ArcJobsError::BadInput(
                    "split size is only valid for split zip jobs".to_string(),
                ))
            }
            _ => {}
        }
        match (self.encryption, password) {
            (ZipEncryption::None, Some(_)) => Err(ArcJobsError::BadInput(
                "password given but zip encryption is disabled".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// 실제로 쓸 암호화 방식. 암호화 방식은 비밀번호가 있을 때만 적용된다.
    pub fn encryption_for(&self, password: Option<&str>) -> ZipEncryption {
        match password {
            Some(_) => self.encryption,
            None => ZipEncryption::None,
        }
    }
}

impl SevenZOptions {
    pub fn validate(&self) -> Result<()> {
        if self.level > 9 {
            return Err(ArcJobsError::BadInput(format!(
                "7z level must be 0..=9, got {}",
                self.level
            )));
        }
        validate_threads(self.threads)
    }
}

impl CodecOptions {
    pub fn validate(&self) -> Result<()> {
        if let Some(level) = self.level {
            let range = self.codec.level_range();
            if !range.contains(&level) {
                return Err(ArcJobsError::BadInput(format!(
                    "{} level must be {}..={}, got {}",
                    self.codec,
                    range.start(),
                    range.end(),
                    level
                )));
            }
        }
        if self.threads.is_some() && self.codec != Codec::Xz {
            return Err(ArcJobsError::BadInput(format!(
                "{} does not support multi-threaded compression",
                self.codec
            )));
        }
        validate_threads(self.threads)
    }

    pub fn effective_level(&self) -> u32 {
        self.level.unwrap_or_else(|| self.codec.default_level())
    }
}

fn validate_threads(threads: Option<u32>) -> Result<()> {
    match threads {
        Some(n) if n == 0 || n > MAX_THREADS => Err(ArcJobsError::BadInput(format!(
            "thread count must be 1..={}, got {}",
            MAX_THREADS, n
        ))),
        _ => Ok(()),
    }
}

/// 작업 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub kind: JobKind,
    /// 원본 경로 (순서 유지). 해제 작업은 아카이브 하나
    pub sources: Vec<PathBuf>,
    /// 출력 디렉토리
    pub destination: PathBuf,
    /// 생성 작업의 출력 이름 (확장자 없으면 자동으로 붙음)
    pub archive_name: Option<String>,
    pub password: Option<String>,
    pub options: FormatOptions,
}

impl JobRequest {
    pub fn new(kind: JobKind, sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            sources,
            destination: destination.into(),
            archive_name: None,
            password: None,
            options: FormatOptions::Default,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_archive_name(mut self, name: impl Into<String>) -> Self {
        self.archive_name = Some(name.into());
        self
    }

    pub fn with_options(mut self, options: FormatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn single_source(&self) -> Result<&Path> {
        match self.sources.as_slice() {
            [one] => Ok(one.as_path()),
            _ => Err(ArcJobsError::BadInput(format!(
                "{} takes exactly one source, got {}",
                self.kind,
                self.sources.len()
            ))),
        }
    }

    /// 종류와 무관한 공통 검증. 포맷별 검증은 작업 생성 시 수행한다.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(ArcJobsError::BadInput("no source selected".to_string()));
        }
        if self.kind.is_extract() || self.kind == JobKind::CompressCodecStream {
            self.single_source()?;
        }
        for source in &self.sources {
            let meta = source.symlink_metadata().map_err(|_| {
                ArcJobsError::BadInput(format!("source not found: {}", source.display()))
            })?;
            let needs_file = self.kind.is_extract() || self.kind == JobKind::CompressCodecStream;
            if needs_file && !meta.is_file() {
                return Err(ArcJobsError::BadInput(format!(
                    "source is not a regular file: {}",
                    source.display()
                )));
            }
        }

        if self.destination.as_os_str().is_empty() {
            return Err(ArcJobsError::BadInput("destination is empty".to_string()));
        }
        if self.destination.exists() && !self.destination.is_dir() {
            return Err(ArcJobsError::BadInput(format!(
                "destination is not a directory: {}",
                self.destination.display()
            )));
        }

        if let Some(password) = &self.password {
            if password.is_empty() {
                return Err(ArcJobsError::BadInput("password is empty".to_string()));
            }
            if !self.kind.accepts_password() {
                return Err(ArcJobsError::BadInput(format!(
                    "{} does not support passwords",
                    self.kind
                )));
            }
        }

        if let Some(name) = &self.archive_name {
            if self.kind.is_extract() || self.kind == JobKind::CompressCodecStream {
                return Err(ArcJobsError::BadInput(format!(
                    "{} does not take an archive name",
                    self.kind
                )));
            }
            validate_archive_name(name)?;
        }
        Ok(())
    }
}

fn validate_archive_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    let mut components = Path::new(trimmed).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if trimmed.is_empty() || !single_normal || trimmed.contains(['/', '\\']) {
        return Err(ArcJobsError::BadInput(format!(
            "invalid archive name: '{}'",
            name
        )));
    }
    Ok(())
}
