//! 엔진 설정 (TOML)
//!
//! 경로: `$ARCJOBS_CONFIG_FILE` → `<config_dir>/arcjobs/config.toml`.
//! 파일이 없으면 기본값을 쓴다.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::request::{CodecOptions, SevenZOptions, TarOptions, ZipOptions};
use crate::utils::error::{ArcJobsError, Result};

pub const CONFIG_FILE_ENV: &str = "ARCJOBS_CONFIG_FILE";

const MIN_BUFFER_SIZE: usize = 4 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// tracing 필터 (RUST_LOG가 우선)
    pub log_filter: String,
    /// 스트림 복사 단위 (바이트)
    pub buffer_size: usize,
    /// RAR 해제에 쓰는 외부 프로그램. 비밀번호는 `-p<비밀번호>` 인자로 넘어가
    /// 실행 중에는 프로세스 목록에 보인다.
    pub rar_program: String,
    pub zip: ZipOptions,
    pub sevenz: SevenZOptions,
    pub tar: TarOptions,
    pub codec: CodecOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            buffer_size: 64 * 1024,
            rar_program: "unrar".to_string(),
            zip: ZipOptions::default(),
            sevenz: SevenZOptions::default(),
            tar: TarOptions::default(),
            codec: CodecOptions::default(),
        }
    }
}

impl EngineConfig {
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(custom) = env::var(CONFIG_FILE_ENV) {
            let trimmed = custom.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        dirs::config_dir().map(|dir| dir.join("arcjobs").join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ArcJobsError::Io(e)),
        };
        let config = Self::parse(&data)
            .map_err(|e| ArcJobsError::Config(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn parse(data: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(data).map_err(|e| ArcJobsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ArcJobsError::Config(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(ArcJobsError::Config(format!(
                "buffer_size must be at least {} bytes",
                MIN_BUFFER_SIZE
            )));
        }
        if self.rar_program.trim().is_empty() {
            return Err(ArcJobsError::Config("rar_program is empty".to_string()));
        }
        self.sevenz
            .validate()
            .and_then(|_| self.codec.validate())
            .map_err(|e| ArcJobsError::Config(e.to_string()))
    }
}
