//! 작업 경로 계산
//!
//! 다중 볼륨 이름 정규화, 충돌 없는 출력 경로, 아카이브 내부 경로 변환

use std::path::{Component, Path, PathBuf};

/// 볼륨 번호 자릿수 (`.7z.001`)
pub const VOLUME_INDEX_WIDTH: usize = 3;

const MULTI_VOLUME_EXTENSIONS: [&str; 2] = ["7z", "zip"];

/// 확장자를 떼어 출력 디렉토리 이름을 만들 때 쓰는 접미사 (긴 것부터)
const ARCHIVE_SUFFIXES: [&str; 22] = [
    ".tar.gz", ".tar.bz2", ".tar.xz", ".tar.zst", ".tar.lzma", ".tgz", ".tbz2", ".tbz", ".txz",
    ".tzst", ".tlz", ".tar", ".zip", ".jar", ".war", ".7z", ".rar", ".gz", ".bz2", ".xz",
    ".lzma", ".zst",
];

/// `<base>.<ext>.<NNN>` 형태의 파일 이름을 (`<base>`, NNN)으로 분해한다.
pub fn parse_volume_name<'a>(file_name: &'a str, extension: &str) -> Option<(&'a str, u32)> {
    if file_name.len() < VOLUME_INDEX_WIDTH + 1 {
        return None;
    }
    let (head, digits) = file_name.split_at(file_name.len() - VOLUME_INDEX_WIDTH);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let head = head.strip_suffix('.')?;
    let dot = head.rfind('.')?;
    let (base, ext) = (&head[..dot], &head[dot + 1..]);
    if base.is_empty() || !ext.eq_ignore_ascii_case(extension) {
        return None;
    }
    let index = digits.parse::<u32>().ok()?;
    Some((base, index))
}

/// 볼륨 파일 경로: `<dir>/<base>.<ext>.<NNN>`
pub fn volume_path(dir: &Path, base: &str, extension: &str, index: u32) -> PathBuf {
    dir.join(format!(
        "{}.{}.{:0width$}",
        base,
        extension,
        index,
        width = VOLUME_INDEX_WIDTH
    ))
}

/// 다중 볼륨 중 아무 볼륨이 들어와도 첫 볼륨(`.001`) 경로로 바꾼다.
/// 패턴에 맞지 않는 경로는 그대로 반환한다.
pub fn normalize_multi_volume_name(path: &Path) -> PathBuf {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return path.to_path_buf();
    };
    for extension in MULTI_VOLUME_EXTENSIONS {
        if parse_volume_name(file_name, extension).is_some() {
            let head = &file_name[..file_name.len() - VOLUME_INDEX_WIDTH];
            return path.with_file_name(format!("{}001", head));
        }
    }
    path.to_path_buf()
}

/// `parent/base`가 없으면 그대로, 있으면 `base_1`, `base_2`, ... 중 처음 비어 있는 경로
pub fn resolve_collision_free_directory(parent: &Path, base: &str) -> PathBuf {
    let candidate = parent.join(base);
    if !exists_or_dangling(&candidate) {
        return candidate;
    }
    let mut counter = 1u64;
    loop {
        let candidate = parent.join(format!("{}_{}", base, counter));
        if !exists_or_dangling(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// 단일 파일 출력용: `name.ext` → `name_1.ext` → `name_2.ext` ...
pub fn resolve_collision_free_file(parent: &Path, file_name: &str) -> PathBuf {
    let candidate = parent.join(file_name);
    if !exists_or_dangling(&candidate) {
        return candidate;
    }
    // 숨김 파일(`.bashrc`)의 앞 점은 확장자로 보지 않는다
    let skip = file_name.chars().next().map(char::len_utf8).unwrap_or(0);
    let (stem, ext) = match file_name[skip..].find('.') {
        Some(pos) => file_name.split_at(skip + pos),
        None => (file_name, ""),
    };
    let mut counter = 1u64;
    loop {
        let candidate = parent.join(format!("{}_{}{}", stem, counter, ext));
        if !exists_or_dangling(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

fn exists_or_dangling(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// `base` 기준 상대 경로(`/` 구분). `base` 밖이면 파일 이름만 돌려준다.
pub fn relativize(base: &Path, target: &Path) -> String {
    match target.strip_prefix(base) {
        Ok(rest) if rest.components().next().is_some() => archive_display_path(rest),
        _ => target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
    }
}

/// 아카이브 파일 이름에서 확장자와 볼륨 번호를 제거한 이름
pub fn archive_base_name(archive: &Path) -> String {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut name = name.as_str();
    for extension in MULTI_VOLUME_EXTENSIONS {
        if let Some((base, _)) = parse_volume_name(name, extension) {
            name = base;
            break;
        }
    }

    let lower = name.to_ascii_lowercase();
    let trimmed = ARCHIVE_SUFFIXES
        .iter()
        .find(|suffix| lower.ends_with(*suffix) && lower.len() > suffix.len())
        .map(|suffix| &name[..name.len() - suffix.len()])
        .unwrap_or(name);

    if trimmed.is_empty() {
        "archive".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn archive_display_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(v) => Some(v.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// 아카이브 엔트리 경로를 출력 루트 아래로 결합한다. 절대 경로와 `..`는 거부.
pub fn sanitize_extract_path(dest_root: &Path, raw_path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for comp in raw_path.components() {
        match comp {
            Component::Normal(v) => clean.push(v),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        return None;
    }
    let out = dest_root.join(clean);
    if out.starts_with(dest_root) {
        Some(out)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_multi_volume_name() {
        assert_eq!(
            normalize_multi_volume_name(Path::new("/d/photos.7z.003")),
            PathBuf::from("/d/photos.7z.001")
        );
        assert_eq!(
            normalize_multi_volume_name(Path::new("/d/photos.7z.001")),
            PathBuf::from("/d/photos.7z.001")
        );
        assert_eq!(
            normalize_multi_volume_name(Path::new("/d/Backup.ZIP.012")),
            PathBuf::from("/d/Backup.ZIP.001")
        );
        assert_eq!(
            normalize_multi_volume_name(Path::new("/d/photos.7z")),
            PathBuf::from("/d/photos.7z")
        );
        assert_eq!(
            normalize_multi_volume_name(Path::new("/d/photos.7z.01")),
            PathBuf::from("/d/photos.7z.01")
        );
        assert_eq!(
            normalize_multi_volume_name(Path::new("/d/photos.rar.002")),
            PathBuf::from("/d/photos.rar.002")
        );
    }

    #[test]
    fn test_parse_volume_name() {
        assert_eq!(parse_volume_name("a.b.7z.010", "7z"), Some(("a.b", 10)));
        assert_eq!(parse_volume_name(".7z.001", "7z"), None);
        assert_eq!(parse_volume_name("a.7z.x01", "7z"), None);
        assert_eq!(parse_volume_name("a.zip.001", "7z"), None);
    }

    #[test]
    fn test_resolve_collision_free_directory() {
        let temp = tempdir().expect("create tempdir");
        let first = resolve_collision_free_directory(temp.path(), "out");
        assert_eq!(first, temp.path().join("out"));

        fs::create_dir(&first).expect("create out");
        fs::write(temp.path().join("out_1"), b"file").expect("create out_1 file");
        let third = resolve_collision_free_directory(temp.path(), "out");
        assert_eq!(third, temp.path().join("out_2"));
        assert!(!third.exists());
    }

    #[test]
    fn test_resolve_collision_free_file() {
        let temp = tempdir().expect("create tempdir");
        fs::write(temp.path().join("notes.tar"), b"x").expect("create notes.tar");
        fs::write(temp.path().join("notes_1.tar"), b"x").expect("create notes_1.tar");
        assert_eq!(
            resolve_collision_free_file(temp.path(), "notes.tar"),
            temp.path().join("notes_2.tar")
        );
        fs::write(temp.path().join("README"), b"x").expect("create README");
        assert_eq!(
            resolve_collision_free_file(temp.path(), "README"),
            temp.path().join("README_1")
        );
    }

    #[test]
    fn test_relativize() {
        assert_eq!(
            relativize(Path::new("/a/b"), Path::new("/a/b/c/d.txt")),
            "c/d.txt"
        );
        assert_eq!(relativize(Path::new("/a/b"), Path::new("/x/y.txt")), "y.txt");
    }

    #[test]
    fn test_archive_base_name() {
        assert_eq!(archive_base_name(Path::new("/d/photos.7z.002")), "photos");
        assert_eq!(archive_base_name(Path::new("/d/src.tar.gz")), "src");
        assert_eq!(archive_base_name(Path::new("/d/data.ZIP")), "data");
        assert_eq!(archive_base_name(Path::new("/d/.zip")), ".zip");
        assert_eq!(archive_base_name(Path::new("/d/plain")), "plain");
    }

    #[test]
    fn test_sanitize_extract_path_blocks_unsafe_paths() {
        let root = PathBuf::from("/tmp/base");
        assert!(sanitize_extract_path(&root, Path::new("ok/file.txt")).is_some());
        assert!(sanitize_extract_path(&root, Path::new("./ok")).is_some());
        assert!(sanitize_extract_path(&root, Path::new("../evil")).is_none());
        assert!(sanitize_extract_path(&root, Path::new("/abs/path")).is_none());
        assert!(sanitize_extract_path(&root, Path::new("")).is_none());
    }
}
