//! Small filesystem helpers shared by the stages.

use std::io;
use std::path::Path;

/// Write `contents` to a temporary sibling and rename it over `path`, so a
/// reader (or an interrupt) never observes a truncated file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.partial", file_name));
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

/// Move a file, falling back to copy-and-delete across filesystems.
pub fn move_file(src: &Path, dest: &Path) -> io::Result<()> {
    match std::fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            // rename(2) fails with EXDEV across mount points.
            if std::fs::copy(src, dest).is_err() {
                return Err(rename_err);
            }
            std::fs::remove_file(src)
        }
    }
}

/// `remove_dir_all` that treats an absent directory as success.
pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Insert `-<suffix>` before the extension: `x.yaml` → `x-<suffix>.yaml`.
pub fn suffixed_file_name(file_name: &str, suffix: &str) -> String {
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}-{}{}", &file_name[..dot], suffix, &file_name[dot..]),
        _ => format!("{}-{}", file_name, suffix),
    }
}
