use crate::{DepthcamError, Result};
use std::fs;
use std::io;
use std::path::Path;

/// Copy the bundled resource tree at `bundle` into `storage_root`.
///
/// Directories are created as needed and existing files overwritten, so
/// staging on every cold start is fine. Returns the number of files
/// copied. Any IO failure aborts staging.
pub fn stage_resources(bundle: &Path, storage_root: &Path) -> Result<usize> {
    log::debug!(
        "Start resource staging: {} -> {}",
        bundle.display(),
        storage_root.display()
    );

    let copied = copy_tree(bundle, storage_root)?;

    log::debug!("Resource staging completed ({} files)", copied);
    Ok(copied)
}

fn copy_tree(src: &Path, dst: &Path) -> Result<usize> {
    fs::create_dir_all(dst).map_err(|e| staging_error(dst, e))?;

    let mut copied = 0;
    for entry in fs::read_dir(src).map_err(|e| staging_error(src, e))? {
        let entry = entry.map_err(|e| staging_error(src, e))?;
        let path = entry.path();
        let target = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| staging_error(&path, e))?;

        if file_type.is_dir() {
            log::debug!("Copy recursively: {}/", path.display());
            copied += copy_tree(&path, &target)?;
        } else {
            log::trace!("Copy file: {}", path.display());
            fs::copy(&path, &target).map_err(|e| staging_error(&path, e))?;
            copied += 1;
        }
    }

    Ok(copied)
}

fn staging_error(path: &Path, source: io::Error) -> DepthcamError {
    log::error!("Resource staging failed at {}: {}", path.display(), source);
    DepthcamError::Staging {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_nested_tree() {
        let bundle = tempfile::tempdir().unwrap();
        let storage = tempfile::tempdir().unwrap();

        fs::write(bundle.path().join("OpenNI.ini"), "[Log]\nVerbosity=3\n").unwrap();
        fs::create_dir_all(bundle.path().join("OpenNI2/Drivers")).unwrap();
        fs::write(bundle.path().join("OpenNI2/Drivers/tof.ini"), "mode=1").unwrap();
        fs::create_dir_all(bundle.path().join("empty")).unwrap();

        let copied = stage_resources(bundle.path(), storage.path()).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(
            fs::read_to_string(storage.path().join("OpenNI2/Drivers/tof.ini")).unwrap(),
            "mode=1"
        );
        assert!(storage.path().join("empty").is_dir());

        // Re-staging overwrites in place.
        fs::write(bundle.path().join("OpenNI.ini"), "[Log]\nVerbosity=0\n").unwrap();
        assert_eq!(stage_resources(bundle.path(), storage.path()).unwrap(), 2);
        assert_eq!(
            fs::read_to_string(storage.path().join("OpenNI.ini")).unwrap(),
            "[Log]\nVerbosity=0\n"
        );
    }

    #[test]
    fn test_missing_bundle_is_fatal() {
        let storage = tempfile::tempdir().unwrap();
        let missing = storage.path().join("no-such-bundle");
        let err = stage_resources(&missing, &storage.path().join("out")).unwrap_err();
        match err {
            DepthcamError::Staging { path, source } => {
                assert_eq!(path, missing);
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
