use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Writes `bytes` next to `path` and renames over it, so readers never see
/// a half-written template or island file.
pub(crate) fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let staging = staging_path_for(path);
    if let Err(error) = fs::write(&staging, bytes) {
        let _ = fs::remove_file(&staging);
        return Err(error);
    }
    swap_into_place(&staging, path)
}

pub(crate) fn write_text_atomic(path: &Path, text: &str) -> io::Result<()> {
    write_bytes_atomic(path, text.as_bytes())
}

fn swap_into_place(staging: &Path, target: &Path) -> io::Result<()> {
    // rename() does not replace an existing file on every platform.
    if let Err(error) = fs::remove_file(target) {
        if error.kind() != io::ErrorKind::NotFound {
            let _ = fs::remove_file(staging);
            return Err(error);
        }
    }

    fs::rename(staging, target).inspect_err(|_| {
        let _ = fs::remove_file(staging);
    })
}

fn staging_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("island-data");
    path.with_file_name(format!(".{file_name}.{}.partial", std::process::id()))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn creates_parent_and_replaces_existing_file() {
        let temp = TempDir::new().expect("temp");
        let path = temp.path().join("nested").join("island.json");

        write_text_atomic(&path, "first").expect("first write");
        write_text_atomic(&path, "second").expect("second write");

        assert_eq!(fs::read_to_string(&path).expect("read"), "second");
        let leftovers = fs::read_dir(path.parent().expect("parent"))
            .expect("read dir")
            .count();
        assert_eq!(leftovers, 1);
    }
}
