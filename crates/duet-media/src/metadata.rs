use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lofty::prelude::*;
use lofty::probe::Probe;
use tracing::debug;

use crate::error::MediaError;

/// Tags read from an audio file. Every field is optional; callers fall back
/// to the file name for the title.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    /// Raw bytes of the first embedded picture.
    pub artwork: Option<Vec<u8>>,
    pub duration: Option<Duration>,
}

impl AudioMetadata {
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration.map(|d| d.as_secs_f64())
    }
}

/// Read title, artist, artwork and duration on a blocking thread.
pub async fn extract_audio_metadata(path: &Path) -> Result<AudioMetadata, MediaError> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || read_audio_metadata(&path)).await?
}

pub fn read_audio_metadata(path: &Path) -> Result<AudioMetadata, MediaError> {
    let file = File::open(path)?;
    let tagged = Probe::new(BufReader::new(file)).guess_file_type()?.read()?;

    let duration = tagged.properties().duration();
    let mut meta = AudioMetadata {
        duration: (!duration.is_zero()).then_some(duration),
        ..Default::default()
    };

    if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
        meta.title = tag.title().map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        meta.artist = tag.artist().map(|a| a.trim().to_string()).filter(|a| !a.is_empty());
        meta.artwork = tag.pictures().first().map(|p| p.data().to_vec());
    }

    debug!(
        path = %path.display(),
        has_title = meta.title.is_some(),
        has_artwork = meta.artwork.is_some(),
        duration_ms = meta.duration.map(|d| d.as_millis() as u64),
        "audio metadata read"
    );

    Ok(meta)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Mono 8-bit PCM WAV of `secs` seconds at 8 kHz.
    pub(crate) fn write_wav(path: &Path, secs: u32) {
        let rate: u32 = 8000;
        let data_len = rate * secs;
        let mut buf = Vec::with_capacity(44 + data_len as usize);
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&(36 + data_len).to_le_bytes());
        buf.extend_from_slice(b"WAVEfmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
        buf.extend_from_slice(&1u16.to_le_bytes()); // mono
        buf.extend_from_slice(&rate.to_le_bytes());
        buf.extend_from_slice(&rate.to_le_bytes()); // byte rate
        buf.extend_from_slice(&1u16.to_le_bytes()); // block align
        buf.extend_from_slice(&8u16.to_le_bytes()); // bits per sample
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&data_len.to_le_bytes());
        buf.resize(44 + data_len as usize, 0x80);
        std::fs::write(path, buf).unwrap();
    }

    #[tokio::test]
    async fn untagged_wav_has_duration_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 2);

        let meta = extract_audio_metadata(&path).await.unwrap();
        assert!(meta.title.is_none());
        assert!(meta.artwork.is_none());
        let secs = meta.duration_secs().unwrap();
        assert!((secs - 2.0).abs() < 0.05, "duration {secs}");
    }

    #[tokio::test]
    async fn non_audio_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.mp3");
        std::fs::write(&path, b"definitely not audio").unwrap();

        assert!(extract_audio_metadata(&path).await.is_err());
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = extract_audio_metadata(Path::new("/nonexistent/duet/a.mp3")).await.unwrap_err();
        assert!(matches!(err, MediaError::Io(_)));
    }
}
