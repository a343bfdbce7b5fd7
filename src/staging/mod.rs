//! # Upload Staging
//!
//! Owns the staging directory: the only place where requests touch a shared
//! filesystem namespace.
//!
//! ## Safety model:
//! Every staged path is built from a fresh UUIDv4 token, never from the client's
//! filename, so two in-flight requests can never address the same file even when
//! they upload identically named files. No lock is needed.
//!
//! ## File lifecycle:
//! 1. **Raw**: `<root>/<token>.upload[.<ext>]`, the bytes exactly as uploaded
//! 2. **Transcoded**: `<root>/<token>.pcm16.wav`, written by the transcoder
//! 3. **Consumed**: read by the transcription service
//! 4. **Deleted**: by the owning `StagingLease`, on every exit path
//!
//! A `StagingLease` records each path it creates and deletes them all exactly
//! once, either through an explicit `cleanup()` or from `Drop`. Dropping covers
//! error returns and requests whose future is dropped when the client goes away.

pub mod transcoder;

use crate::error::FileError;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use transcoder::Transcoder;
use uuid::Uuid;

/// Longest extension carried over from the client filename.
const MAX_EXTENSION_LEN: usize = 8;

/// Which lifecycle stage a staged path holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Raw,
    Transcoded,
}

/// One upload's working copy, owned by exactly one request.
#[derive(Debug, Clone)]
pub struct StagedFile {
    token: Uuid,
    path: PathBuf,
    kind: StageKind,
}

impl StagedFile {
    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }
}

/// Handle to the staging directory, shared by all requests.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Make sure the directory exists; called once at startup.
    pub fn prepare(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    /// Start a new scope of staged files.
    pub fn lease(&self) -> StagingLease {
        StagingLease {
            root: self.root.clone(),
            owned: Vec::new(),
        }
    }
}

/// Scoped ownership of the files one upload creates.
///
/// Everything registered here is deleted when the lease is cleaned up or
/// dropped, whichever comes first.
#[derive(Debug)]
pub struct StagingLease {
    root: PathBuf,
    owned: Vec<PathBuf>,
}

impl StagingLease {
    /// Persist uploaded bytes under a fresh, collision-free path.
    ///
    /// ## Errors:
    /// `FileError::Storage` when the staging directory cannot be created or the
    /// file cannot be written (disk full, permission denied).
    pub async fn stage(&mut self, filename: &str, bytes: &[u8]) -> Result<StagedFile, FileError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(FileError::Storage)?;

        let token = Uuid::new_v4();
        let path = raw_path(&self.root, token, filename);

        // create_new: never clobber a path this lease does not own
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(FileError::Storage)?;
        self.owned.push(path.clone());

        file.write_all(bytes).await.map_err(FileError::Storage)?;
        file.flush().await.map_err(FileError::Storage)?;

        debug!(
            token = %token,
            filename = %filename,
            path = %path.display(),
            bytes = bytes.len(),
            "Staged upload"
        );

        Ok(StagedFile {
            token,
            path,
            kind: StageKind::Raw,
        })
    }

    /// Convert a raw upload into the canonical waveform next to it.
    ///
    /// The output path is derived from the raw file's token and registered
    /// before the transcoder starts, so a partial output is cleaned up too.
    pub async fn transcode(
        &mut self,
        transcoder: &dyn Transcoder,
        raw: &StagedFile,
    ) -> Result<StagedFile, FileError> {
        let output = transcoded_path(&self.root, raw.token());
        self.owned.push(output.clone());

        transcoder.transcode(raw.path(), &output).await?;

        debug!(token = %raw.token(), path = %output.display(), "Transcoded upload");

        Ok(StagedFile {
            token: raw.token(),
            path: output,
            kind: StageKind::Transcoded,
        })
    }

    /// Paths currently owned by this lease.
    #[cfg(test)]
    pub fn paths(&self) -> &[PathBuf] {
        &self.owned
    }

    /// Delete every owned path. Returns how many files were actually removed.
    ///
    /// Failures are logged, not returned: the response has usually been
    /// computed already and a leftover file must not change it.
    pub fn cleanup(&mut self) -> usize {
        let mut removed = 0;
        for path in self.owned.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Staged file was never created");
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Failed to delete staged file");
                }
            }
        }
        removed
    }
}

impl Drop for StagingLease {
    fn drop(&mut self) {
        if !self.owned.is_empty() {
            self.cleanup();
        }
    }
}

/// Raw upload path: the token plus, at most, a sanitized extension hint.
pub fn raw_path(root: &Path, token: Uuid, client_filename: &str) -> PathBuf {
    match extension_hint(client_filename) {
        Some(ext) => root.join(format!("{}.upload.{}", token, ext)),
        None => root.join(format!("{}.upload", token)),
    }
}

/// Canonical waveform path for the upload identified by `token`.
pub fn transcoded_path(root: &Path, token: Uuid) -> PathBuf {
    root.join(format!("{}.pcm16.wav", token))
}

/// Short alphanumeric extension of the client filename, lowercased.
///
/// Only a hint for humans looking at the directory; the transcoder probes
/// the content itself.
fn extension_hint(client_filename: &str) -> Option<String> {
    let name = client_filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(client_filename);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > MAX_EXTENSION_LEN {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::transcoder::TranscodeError;
    use futures_util::future::BoxFuture;

    /// Copies the input verbatim, like a transcoder handed an already-canonical file.
    struct CopyTranscoder;

    impl Transcoder for CopyTranscoder {
        fn transcode<'a>(&'a self, input: &'a Path, output: &'a Path) -> BoxFuture<'a, Result<(), TranscodeError>> {
            Box::pin(async move {
                tokio::fs::copy(input, output).await.map_err(|source| TranscodeError::Spawn {
                    program: "copy".to_string(),
                    source,
                })?;
                Ok(())
            })
        }
    }

    /// Leaves a partial output behind and then fails.
    struct PartialTranscoder;

    impl Transcoder for PartialTranscoder {
        fn transcode<'a>(&'a self, _input: &'a Path, output: &'a Path) -> BoxFuture<'a, Result<(), TranscodeError>> {
            Box::pin(async move {
                tokio::fs::write(output, b"RIF").await.unwrap();
                Err(TranscodeError::Failed {
                    code: Some(1),
                    stderr: "conversion failed".to_string(),
                })
            })
        }
    }

    fn dir_entries(root: &Path) -> usize {
        std::fs::read_dir(root).map(|entries| entries.count()).unwrap_or(0)
    }

    #[test]
    fn test_extension_hint() {
        assert_eq!(extension_hint("speech.MP3").as_deref(), Some("mp3"));
        assert_eq!(extension_hint("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension_hint("noext"), None);
        assert_eq!(extension_hint(".bashrc"), None);
        assert_eq!(extension_hint("evil.w/a/v"), None);
        assert_eq!(extension_hint("x.$(rm -rf)"), None);
        assert_eq!(extension_hint("clip.verylongextension"), None);
        assert_eq!(extension_hint("C:\\uploads\\memo.Wav").as_deref(), Some("wav"));
    }

    #[test]
    fn test_paths_never_use_client_filename() {
        let root = Path::new("/srv/staging");
        let token = Uuid::new_v4();

        let raw = raw_path(root, token, "../../etc/passwd.wav");
        assert_eq!(raw.parent(), Some(root));
        assert_eq!(raw.file_name().unwrap().to_str().unwrap(), format!("{}.upload.wav", token));

        let raw = raw_path(root, token, "meeting notes");
        assert_eq!(raw, root.join(format!("{}.upload", token)));

        let wav = transcoded_path(root, token);
        assert_eq!(wav.parent(), Some(root));
        assert_ne!(wav, raw_path(root, token, "already.wav"));
    }

    #[tokio::test]
    async fn test_stage_writes_bytes_under_unique_path() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path().join("uploads"));
        let mut lease = area.lease();

        let staged = lease.stage("clip.mp3", b"ID3 bytes").await.unwrap();
        assert_eq!(staged.kind(), StageKind::Raw);
        assert_eq!(staged.path().parent(), Some(area.root()));
        assert!(!staged.path().to_string_lossy().contains("clip"));
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"ID3 bytes");
        assert_eq!(lease.paths().len(), 1);
    }

    #[tokio::test]
    async fn test_identical_filenames_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());
        let mut first = area.lease();
        let mut second = area.lease();

        let (a, b) = tokio::join!(first.stage("audio.wav", b"first"), second.stage("audio.wav", b"second"));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.path(), b.path());
        assert_ne!(a.token(), b.token());
        assert_eq!(std::fs::read(a.path()).unwrap(), b"first");
        assert_eq!(std::fs::read(b.path()).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_transcode_derives_new_path() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());
        let mut lease = area.lease();

        let raw = lease.stage("a.wav", b"RIFF....").await.unwrap();
        let wav = lease.transcode(&CopyTranscoder, &raw).await.unwrap();

        assert_eq!(wav.kind(), StageKind::Transcoded);
        assert_eq!(wav.token(), raw.token());
        assert_ne!(wav.path(), raw.path());
        assert_eq!(std::fs::read(raw.path()).unwrap(), b"RIFF....");
        assert_eq!(std::fs::read(wav.path()).unwrap(), b"RIFF....");
        assert_eq!(lease.paths().len(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_removes_everything_once() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());
        let mut lease = area.lease();

        let raw = lease.stage("a.ogg", b"OggS").await.unwrap();
        lease.transcode(&CopyTranscoder, &raw).await.unwrap();
        assert_eq!(dir_entries(dir.path()), 2);

        assert_eq!(lease.cleanup(), 2);
        assert_eq!(dir_entries(dir.path()), 0);
        assert!(lease.paths().is_empty());
        assert_eq!(lease.cleanup(), 0);
    }

    #[tokio::test]
    async fn test_drop_cleans_up_after_failed_transcode() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());

        {
            let mut lease = area.lease();
            let raw = lease.stage("a.flac", b"fLaC").await.unwrap();
            let err = lease.transcode(&PartialTranscoder, &raw).await.unwrap_err();
            assert!(matches!(err, FileError::Transcode(TranscodeError::Failed { .. })));
            assert_eq!(dir_entries(dir.path()), 2);
        }

        assert_eq!(dir_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_cleanup_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());
        let mut lease = area.lease();

        let raw = lease.stage("a.wav", b"x").await.unwrap();
        std::fs::remove_file(raw.path()).unwrap();
        assert_eq!(lease.cleanup(), 0);
    }

    #[tokio::test]
    async fn test_stage_reports_storage_errors() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file in the way").unwrap();

        let area = StagingArea::new(&blocker);
        let mut lease = area.lease();
        let err = lease.stage("a.wav", b"data").await.unwrap_err();
        assert!(matches!(err, FileError::Storage(_)));
        assert!(lease.paths().is_empty());
    }
}
