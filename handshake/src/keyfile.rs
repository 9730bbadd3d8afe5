//! Session key persistence: the raw 32 key bytes, nothing else

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use zeroize::Zeroizing;

use crate::error::Result;
use crate::session::SessionKey;

/// Write `key` to `path`, owner-readable only on unix
///
/// The key goes into a fresh file created with its final mode, which is then
/// renamed over `path`. A handle already open on an earlier file at `path`
/// never sees the new key.
pub async fn write_session_key(path: impl AsRef<Path>, key: &SessionKey) -> Result<()> {
    let path = path.as_ref();
    let staging = staging_path(path);

    if let Err(e) = write_new(&staging, key.as_bytes()).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&staging, path).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(e.into());
    }

    tracing::info!(path = %path.display(), key = %key.fingerprint(), "session key written");
    Ok(())
}

async fn write_new(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Sibling of `path` with a random suffix, so the rename stays on one filesystem
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{:016x}.tmp", rand::random::<u64>()))
}

/// Load a key written by [`write_session_key`], rejecting any other length
pub async fn read_session_key(path: impl AsRef<Path>) -> Result<SessionKey> {
    let bytes = Zeroizing::new(tokio::fs::read(path.as_ref()).await?);
    Ok(SessionKey::from_bytes(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ChannelError, QsslError};

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.key");
        let key = SessionKey::from_bytes(&[0x5C; 32]).unwrap();

        write_session_key(&path, &key).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 32);
        assert_eq!(read_session_key(&path).await.unwrap(), key);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.key");
        let key = SessionKey::from_bytes(&[1; 32]).unwrap();
        write_session_key(&path, &key).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_overwrite_does_not_reach_open_readers() {
        use std::io::{Read, Seek, SeekFrom};
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.key");
        std::fs::write(&path, b"stale").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        let mut reader = std::fs::File::open(&path).unwrap();

        let key = SessionKey::from_bytes(&[0xA7; 32]).unwrap();
        write_session_key(&path, &key).await.unwrap();

        let mut seen = Vec::new();
        reader.seek(SeekFrom::Start(0)).unwrap();
        reader.read_to_end(&mut seen).unwrap();
        assert_eq!(seen, b"stale");

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(read_session_key(&path).await.unwrap(), key);
        // no staging file left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_wrong_length_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.key");
        std::fs::write(&path, [0u8; 16]).unwrap();
        assert!(matches!(
            read_session_key(&path).await,
            Err(QsslError::Channel(ChannelError::InvalidKeyLength {
                expected: 32,
                actual: 16
            }))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_session_key(dir.path().join("absent.key")).await,
            Err(QsslError::Io(_))
        ));
    }
}
