use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::{error, warn};

#[cfg(test)]
use mockall::automock;

use crate::format::format_file_size;

/// Input extensions accepted for conversion (compared case-insensitively)
pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["mpg", "mpeg", "avi", "mkv", "wmv", "flv", "webm"];

/// Expected output size relative to the input
const OUTPUT_SIZE_RATIO: f64 = 0.8;

/// Free space required relative to the expected output size
const SPACE_SAFETY_MARGIN: f64 = 1.5;

/// Source of free-space information for a directory
#[cfg_attr(test, automock)]
pub trait SpaceProbe: Send + Sync {
    fn available_space(&self, dir: &Path) -> io::Result<u64>;
}

/// Free space as reported by the operating system
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn available_space(&self, dir: &Path) -> io::Result<u64> {
        fs2::available_space(dir)
    }
}

pub fn has_supported_extension<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Cheap check used when collecting inputs: the file exists and has a video extension
pub fn is_supported_video<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();
    path.exists() && has_supported_extension(path)
}

/// Check that an input is a readable, non-empty file in a supported format.
///
/// Logs the reason and returns false on the first failing check.
pub fn validate_input<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();
    let name = display_name(path);

    if !path.exists() {
        error!("File not found: {}", name);
        return false;
    }

    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) => {
            error!("Cannot read metadata of {}: {}", name, e);
            return false;
        }
    };

    if !metadata.is_file() {
        error!("Not a regular file: {}", name);
        return false;
    }

    if metadata.len() == 0 {
        error!("File is empty: {}", name);
        return false;
    }

    if !has_supported_extension(path) {
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| "(none)".to_string());
        error!("Unsupported format: {}", ext);
        return false;
    }

    let mut buffer = [0u8; 1024];
    let readable = File::open(path).and_then(|mut file| file.read(&mut buffer));
    match readable {
        Ok(_) => true,
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            error!("No permission to read: {}", name);
            false
        }
        Err(e) => {
            error!("Failed to read {}: {}", name, e);
            false
        }
    }
}

/// Check that the output volume can hold the converted file.
///
/// Returns true when the check itself fails; only a confirmed shortfall
/// returns false.
pub fn check_disk_space<P: AsRef<Path>, Q: AsRef<Path>>(
    probe: &dyn SpaceProbe,
    input_path: P,
    output_path: Q,
) -> bool {
    let input_path = input_path.as_ref();
    let output_path = output_path.as_ref();

    let input_size = match std::fs::metadata(input_path) {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            warn!("Could not check disk space (input size unknown): {}", e);
            return true;
        }
    };

    let output_dir = match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let free_space = match probe.available_space(output_dir) {
        Ok(free) => free,
        Err(e) => {
            warn!("Could not check disk space on {}: {}", output_dir.display(), e);
            return true;
        }
    };

    let required = input_size as f64 * OUTPUT_SIZE_RATIO * SPACE_SAFETY_MARGIN;
    if (free_space as f64) < required {
        error!("Insufficient disk space");
        error!("  Free space: {}", format_file_size(free_space));
        error!("  Required space: {}", format_file_size(required.ceil() as u64));
        return false;
    }

    true
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use mockall::predicate::always;

    #[test]
    fn test_accepts_non_empty_mkv() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("movie.mkv");
        file.write_binary(&[0x1a, 0x45, 0xdf, 0xa3, 0, 0, 0, 0]).unwrap();

        assert!(validate_input(file.path()));
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("MOVIE.WEBM");
        file.write_str("data").unwrap();

        assert!(validate_input(file.path()));
    }

    #[test]
    fn test_rejects_zero_byte_file() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("empty.mkv");
        file.touch().unwrap();

        assert!(!validate_input(file.path()));
    }

    #[test]
    fn test_rejects_unsupported_extension() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("notes.txt");
        file.write_str("not a video").unwrap();

        assert!(!validate_input(file.path()));
    }

    #[test]
    fn test_rejects_missing_file_and_directory() {
        let temp = assert_fs::TempDir::new().unwrap();
        assert!(!validate_input(temp.child("missing.avi").path()));

        let dir = temp.child("folder.avi");
        dir.create_dir_all().unwrap();
        assert!(!validate_input(dir.path()));
    }

    #[test]
    fn test_is_supported_video() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("clip.FLV");
        file.write_str("x").unwrap();

        assert!(is_supported_video(file.path()));
        assert!(!is_supported_video(temp.child("clip.mp4").path()));
        assert!(!is_supported_video(temp.child("absent.mkv").path()));
    }

    #[test]
    fn test_disk_space_sufficient() {
        let temp = assert_fs::TempDir::new().unwrap();
        let input = temp.child("in.mkv");
        input.write_binary(&[0u8; 1000]).unwrap();

        let mut probe = MockSpaceProbe::new();
        // 1000 * 0.8 * 1.5 = 1200
        probe.expect_available_space().with(always()).returning(|_| Ok(1200));

        assert!(check_disk_space(&probe, input.path(), temp.child("out.mov").path()));
    }

    #[test]
    fn test_disk_space_shortfall() {
        let temp = assert_fs::TempDir::new().unwrap();
        let input = temp.child("in.mkv");
        input.write_binary(&[0u8; 1000]).unwrap();

        let mut probe = MockSpaceProbe::new();
        probe.expect_available_space().times(1).returning(|_| Ok(1199));

        assert!(!check_disk_space(&probe, input.path(), temp.child("out.mov").path()));
    }

    #[test]
    fn test_disk_space_probe_failure_is_permissive() {
        let temp = assert_fs::TempDir::new().unwrap();
        let input = temp.child("in.mkv");
        input.write_binary(&[0u8; 1000]).unwrap();

        let mut probe = MockSpaceProbe::new();
        probe
            .expect_available_space()
            .returning(|_| Err(io::Error::new(io::ErrorKind::Other, "statvfs failed")));

        assert!(check_disk_space(&probe, input.path(), temp.child("out.mov").path()));
    }

    #[test]
    fn test_disk_space_queries_output_directory() {
        let temp = assert_fs::TempDir::new().unwrap();
        let input = temp.child("in.mkv");
        input.write_binary(&[0u8; 10]).unwrap();
        let out_dir = temp.path().join("converted");

        let expected = out_dir.clone();
        let mut probe = MockSpaceProbe::new();
        probe
            .expect_available_space()
            .withf(move |dir| dir == expected.as_path())
            .returning(|_| Ok(u64::MAX));

        assert!(check_disk_space(&probe, input.path(), out_dir.join("in.mov")));
    }
}
