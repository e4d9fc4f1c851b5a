//! RAR 해제. 외부 `unrar` 호환 프로그램에 맡기고 출력 줄로 진행률을 센다.
//!
//! unrar는 비밀번호를 `-p<비밀번호>` 인자로만 받으므로 해제하는 동안 같은 호스트의
//! 다른 사용자가 프로세스 목록에서 볼 수 있다. 인자는 로그에 남기지 않는다.

use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, MAIN_SEPARATOR_STR};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use tracing::{debug, warn};

use crate::system::archive::prepare_output_dir;
use crate::system::job::{ExtractTarget, JobContext};
use crate::utils::error::{is_storage_exhausted, ArcJobsError, Result};

/// unrar 종료 코드
const EXIT_FATAL: i32 = 2;
const EXIT_CRC: i32 = 3;
const EXIT_WRITE: i32 = 5;
const EXIT_MEMORY: i32 = 8;
const EXIT_CREATE: i32 = 9;
const EXIT_NO_FILES: i32 = 10;
const EXIT_BAD_PASSWORD: i32 = 11;

pub fn extract_rar(target: &ExtractTarget, ctx: &JobContext) -> Result<()> {
    let program = ctx.config().rar_program.as_str();
    let path = target.archive.as_path();
    let password = target.password.as_deref();

    let total = count_entries(program, path, password)?;
    ctx.checkpoint()?;
    let out_dir = prepare_output_dir(&target.destination, path)?;
    ctx.progress().set_total(total);

    // 출력 경로는 구분자로 끝나야 디렉토리로 취급된다
    let mut dest = out_dir.as_os_str().to_owned();
    dest.push(MAIN_SEPARATOR_STR);
    let mut child = Command::new(program)
        .arg("x")
        .arg(password_arg(password))
        .arg("-o-")
        .arg("-y")
        .arg(path)
        .arg(&dest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_failed(program, e))?;
    debug!(program, archive = %path.display(), "unrar started");

    let stderr = child.stderr.take();
    let stderr_reader = thread::spawn(move || {
        let mut text = String::new();
        if let Some(mut stderr) = stderr {
            if let Err(e) = stderr.read_to_string(&mut text) {
                warn!(error = %e, "failed to read unrar stderr");
            }
        }
        text
    });

    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines() {
            if ctx.should_cancel() {
                kill(&mut child);
                return Err(ArcJobsError::Cancelled);
            }
            let line = line.map_err(ArcJobsError::from_io)?;
            if is_item_line(&line) {
                ctx.progress().advance();
            }
        }
    }

    let status = child.wait().map_err(ArcJobsError::from_io)?;
    let stderr = stderr_reader.join().unwrap_or_default();
    ctx.checkpoint()?;
    if !status.success() {
        return Err(map_exit_status(program, path, status, &stderr, password));
    }
    debug!(dir = %out_dir.display(), "rar extracted");
    Ok(())
}

/// `lb`는 한 줄에 엔트리 이름 하나를 출력한다
fn count_entries(program: &str, path: &Path, password: Option<&str>) -> Result<u64> {
    let output = Command::new(program)
        .arg("lb")
        .arg(password_arg(password))
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| spawn_failed(program, e))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(map_exit_status(program, path, output.status, &stderr, password));
    }
    let count = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .count();
    Ok(count as u64)
}

/// 비밀번호는 명령행 인자로 노출된다 (모듈 문서 참고)
fn password_arg(password: Option<&str>) -> OsString {
    match password {
        Some(pass) => OsString::from(format!("-p{}", pass)),
        // 비밀번호를 묻지 않게 한다
        None => OsString::from("-p-"),
    }
}

/// `Extracting  a.txt   OK`, `Creating    dir   OK` 형태의 줄
fn is_item_line(line: &str) -> bool {
    let line = line.trim_start();
    (line.starts_with("Extracting ") && !line.starts_with("Extracting from "))
        || line.starts_with("Creating ")
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!(error = %e, "failed to kill unrar");
    }
    if let Err(e) = child.wait() {
        warn!(error = %e, "failed to reap unrar");
    }
}

fn spawn_failed(program: &str, error: io::Error) -> ArcJobsError {
    let reason = if error.kind() == io::ErrorKind::NotFound {
        "program not found".to_string()
    } else {
        error.to_string()
    };
    ArcJobsError::ExternalTool {
        program: program.to_string(),
        reason,
    }
}

fn map_exit_status(
    program: &str,
    path: &Path,
    status: ExitStatus,
    stderr: &str,
    password: Option<&str>,
) -> ArcJobsError {
    let detail = stderr.trim();
    let reason = if detail.is_empty() {
        format!("exited with {}", status)
    } else {
        detail.to_string()
    };
    match status.code() {
        Some(EXIT_BAD_PASSWORD) if password.is_none() => ArcJobsError::ArchivePasswordRequired {
            path: path.to_path_buf(),
        },
        Some(EXIT_BAD_PASSWORD) => ArcJobsError::ArchiveInvalidPassword {
            path: path.to_path_buf(),
            reason,
        },
        Some(EXIT_CRC) if password.is_some() => ArcJobsError::ArchiveInvalidPassword {
            path: path.to_path_buf(),
            reason: format!("wrong password or corrupt data ({})", reason),
        },
        Some(EXIT_CRC | EXIT_FATAL | EXIT_NO_FILES) => ArcJobsError::ArchiveExtractFailed {
            path: path.to_path_buf(),
            reason,
        },
        Some(EXIT_MEMORY) => ArcJobsError::OutOfMemory(reason),
        Some(EXIT_WRITE | EXIT_CREATE)
            if is_storage_exhausted(&io::Error::other(reason.clone())) =>
        {
            ArcJobsError::StorageExhausted(io::Error::other(reason))
        }
        _ => ArcJobsError::ExternalTool {
            program: program.to_string(),
            reason,
        },
    }
}
