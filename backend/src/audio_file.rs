//! Transient storage for synthesized speech. Each /speak request gets a
//! uniquely named file under the audio directory; the file is deleted
//! exactly once, when the value owning it drops — which only happens after
//! the response body has been fully sent or the transmission was abandoned.

use crate::error::ApiError;
use actix_web::web::Bytes;
use futures::Stream;
use log::warn;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use uuid::Uuid;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// A synthesized audio file exclusively owned by a single request.
/// Dropping it removes the file from disk.
#[derive(Debug)]
pub struct TempAudioFile {
    path: PathBuf,
    file_name: String,
    len: u64,
}

impl TempAudioFile {
    /// Writes `audio` under `dir` with a collision-free name, creating the
    /// directory if absent. A missing or zero-byte result is treated as a
    /// synthesis failure, and no file is left behind.
    pub fn create(dir: &Path, audio: &[u8]) -> Result<Self, ApiError> {
        fs::create_dir_all(dir)?;
        let file_name = format!("speech_{}.mp3", Uuid::new_v4().simple());
        let path = dir.join(&file_name);
        fs::write(&path, audio)?;

        let len = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if len == 0 {
            let _ = fs::remove_file(&path);
            return Err(ApiError::SynthesisVerification);
        }
        Ok(Self {
            path,
            file_name,
            len,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// Consumes the file into a response-body stream. The stream owns this
    /// guard, so deletion waits for the body to be sent (or dropped early
    /// on client disconnect).
    pub fn into_stream(self) -> Result<AudioFileStream, ApiError> {
        let file = File::open(&self.path)?;
        Ok(AudioFileStream { file, _guard: self })
    }
}

impl Drop for TempAudioFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(
                "failed to remove transient audio file {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Streams the audio file in fixed-size chunks. The files are short
/// synthesized clips, so the reads are served straight from the page cache.
pub struct AudioFileStream {
    file: File,
    _guard: TempAudioFile,
}

impl Stream for AudioFileStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        match this.file.read(&mut buf) {
            Ok(0) => Poll::Ready(None),
            Ok(n) => {
                buf.truncate(n);
                Poll::Ready(Some(Ok(Bytes::from(buf))))
            }
            Err(e) => Poll::Ready(Some(Err(e))),
        }
    }
}
