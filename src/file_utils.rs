// File utilities for Audio API
//
// This module contains utility functions for file operations used in the Audio API.
// It handles creating unique file paths, writing WAV files and removing temporary files.

use log::{debug, error};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::engines::GeneratedAudio;

/// Build a collision-free path `<base_dir>/<prefix>_<uuid>.<extension>`
///
/// The base directory is created if needed; the file itself is not.
pub fn generate_unique_path(base_dir: &Path, prefix: &str, extension: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(base_dir)?;
    let filename = format!("{}_{}.{}", prefix, Uuid::new_v4(), extension);
    Ok(base_dir.join(filename))
}

/// A temporary file removed when the guard is dropped
///
/// Holding the guard for as long as the file is needed makes removal happen on
/// every exit path: early returns, errors, panics and dropped futures.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
}

impl TempFile {
    /// Reserve a unique path under `base_dir`
    pub fn new_in(base_dir: &Path, prefix: &str, extension: &str) -> io::Result<Self> {
        Ok(Self {
            path: generate_unique_path(base_dir, prefix, extension)?,
        })
    }

    /// Take ownership of an existing path
    pub fn adopt(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        cleanup_file(&self.path);
    }
}

/// Write generated audio as a mono 16-bit PCM WAV file
pub fn save_wav(audio: &GeneratedAudio, file_path: &Path) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(file_path, spec)?;
    for &sample in &audio.samples {
        let clamped = sample.clamp(-1.0, 1.0);
        writer.write_sample((clamped * i16::MAX as f32) as i16)?;
    }
    writer.finalize()
}

/// Remove a file if it exists
///
/// This function logs errors but doesn't return them to the caller
pub fn cleanup_file(file_path: &Path) {
    match fs::remove_file(file_path) {
        Ok(()) => debug!("Removed temporary file: {}", file_path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => error!("Failed to remove file {}: {}", file_path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_paths_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let a = generate_unique_path(dir.path(), "speech", "wav").unwrap();
        let b = generate_unique_path(dir.path(), "speech", "wav").unwrap();

        assert_ne!(a, b);
        assert!(a.starts_with(dir.path()));
        assert_eq!(a.extension().unwrap(), "wav");
        assert!(a
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("speech_"));
    }

    #[test]
    fn test_unique_path_creates_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        generate_unique_path(&nested, "x", "wav").unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_temp_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let temp = TempFile::new_in(dir.path(), "speech", "wav").unwrap();
            fs::write(temp.path(), b"data").unwrap();
            assert!(temp.path().exists());
            temp.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_temp_file_drop_without_file_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let temp = TempFile::new_in(dir.path(), "never_written", "wav").unwrap();
        drop(temp);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_save_wav_clamps_and_keeps_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let audio = GeneratedAudio {
            samples: vec![0.0, 1.5, -1.5, 0.5],
            sample_rate: 22_050,
        };
        save_wav(&audio, &path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 22_050);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, i16::MAX, -i16::MAX, i16::MAX / 2]);
    }
}
