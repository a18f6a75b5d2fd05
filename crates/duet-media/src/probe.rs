use std::future::Future;
use std::path::Path;

use crate::error::MediaError;
use crate::metadata::extract_audio_metadata;

/// Measures the playback duration of a local media file.
pub trait MediaProbe: Send + Sync {
    /// Duration in seconds; `None` when the container does not report one.
    fn duration(&self, path: &Path) -> impl Future<Output = Result<Option<f64>, MediaError>> + Send;
}

/// Probe backed by the tag reader. Covers the audio containers and MP4.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyProbe;

impl MediaProbe for LoftyProbe {
    async fn duration(&self, path: &Path) -> Result<Option<f64>, MediaError> {
        Ok(extract_audio_metadata(path).await?.duration_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tests::write_wav;

    #[tokio::test]
    async fn lofty_probe_measures_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.wav");
        write_wav(&path, 3);

        let secs = LoftyProbe.duration(&path).await.unwrap().unwrap();
        assert!((secs - 3.0).abs() < 0.05);
    }
}
