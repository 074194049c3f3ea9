mod error;
mod sanitize;

pub use error::FileStoreError;
pub use sanitize::sanitize_name;

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{info, warn};

/// Candidate download-root providers, tried in order. Each probe either
/// returns a writable path or `None`; the first success wins. Platform
/// detection stays at this edge, not inside the core contract.
pub fn candidate_roots() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(over) = std::env::var("SYNDRO_DOWNLOAD_ROOT") {
        candidates.push(PathBuf::from(over));
    }
    if let Some(home) = dirs_home() {
        candidates.push(home.join("Downloads").join("Syndro"));
        candidates.push(home.join("syndro-downloads"));
    }
    candidates.push(std::env::temp_dir().join("syndro-downloads"));
    candidates
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Resolves a writable, platform-appropriate download directory, creating it
/// if missing and probing writability with a throwaway file.
pub async fn resolve_download_root() -> Result<PathBuf, FileStoreError> {
    for candidate in candidate_roots() {
        if fs::create_dir_all(&candidate).await.is_err() {
            continue;
        }
        let probe = candidate.join(".syndro-write-probe");
        match fs::write(&probe, b"x").await {
            Ok(()) => {
                let _ = fs::remove_file(&probe).await;
                info!("resolved download root: {}", candidate.display());
                return Ok(candidate);
            }
            Err(e) => {
                warn!("download root candidate {} not writable: {}", candidate.display(), e);
                continue;
            }
        }
    }
    Err(FileStoreError::NoWritableDirectory)
}

/// Returns true if `path` (after lexical normalization) is contained within
/// `root`, either as a strict descendant or an exact match.
pub fn is_within(root: &Path, path: &Path) -> bool {
    let normalize = |p: &Path| -> PathBuf {
        let mut out = PathBuf::new();
        for component in p.components() {
            match component {
                std::path::Component::ParentDir => {
                    out.pop();
                }
                std::path::Component::CurDir => {}
                other => out.push(other.as_os_str()),
            }
        }
        out
    };
    let root = normalize(root);
    let path = normalize(path);
    path == root || path.starts_with(&root)
}

/// If `root/name` already exists, appends ` (k)` before the extension for
/// the smallest k >= 1 that yields a free name.
pub async fn unique_name(root: &Path, name: &str) -> String {
    if fs::metadata(root.join(name)).await.is_err() {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    let ext = path.extension().and_then(|s| s.to_str());
    let mut k = 1u32;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{stem} ({k}).{ext}"),
            None => format!("{stem} ({k})"),
        };
        if fs::metadata(root.join(&candidate)).await.is_err() {
            return candidate;
        }
        k += 1;
    }
}

/// A handle to a sparsely-preallocated temp file, supporting random-offset
/// writes before being atomically finalized into place.
pub struct ChunkWriter {
    temp_path: PathBuf,
    final_path: PathBuf,
    file: fs::File,
}

impl ChunkWriter {
    /// Creates `finalPath + ".tmp"` and preallocates it to `total_size`.
    pub async fn open(final_path: &Path, total_size: u64) -> Result<Self, FileStoreError> {
        let temp_path = temp_sibling(final_path);
        let file = fs::File::create(&temp_path).await?;
        file.set_len(total_size).await?;
        Ok(Self { temp_path, final_path: final_path.to_path_buf(), file })
    }

    pub async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), FileStoreError> {
        self.file.seek(std::io::SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        Ok(())
    }

    /// The temp sibling path, hashable/inspectable before `finalize` makes
    /// the payload visible under its final name.
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Appends to the current stream position — used by the sequential
    /// upload path, which never knows the final offset in advance.
    pub async fn write_sequential(&mut self, data: &[u8]) -> Result<(), FileStoreError> {
        self.file.write_all(data).await?;
        Ok(())
    }

    /// Flushes, closes, removes any prior file at `final_path`, and renames
    /// the temp file into place atomically.
    pub async fn finalize(mut self) -> Result<PathBuf, FileStoreError> {
        self.file.flush().await?;
        drop(self.file);
        let _ = fs::remove_file(&self.final_path).await;
        fs::rename(&self.temp_path, &self.final_path).await?;
        Ok(self.final_path)
    }

    pub async fn abort(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }
}

fn temp_sibling(final_path: &Path) -> PathBuf {
    let mut os = final_path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Streams a file in fixed-size chunks without loading it whole.
pub async fn streaming_reader(
    path: &Path,
    chunk_size: usize,
) -> Result<impl futures_util::Stream<Item = std::io::Result<Vec<u8>>>, FileStoreError> {
    let file = fs::File::open(path).await?;
    Ok(async_stream::stream! {
        let mut file = file;
        let mut buf = vec![0u8; chunk_size];
        loop {
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => yield Ok(buf[..n].to_vec()),
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    })
}

/// Reads a whole file into memory, refusing anything above `max_bytes`
/// rather than silently buffering an unbounded amount.
pub async fn read_whole(path: &Path, max_bytes: u64) -> Result<Vec<u8>, FileStoreError> {
    let meta = fs::metadata(path).await?;
    if meta.len() > max_bytes {
        return Err(FileStoreError::TooLargeForDirectRead);
    }
    Ok(fs::read(path).await?)
}

/// Consumes a byte-chunk stream and writes it to `path` sequentially,
/// without ever buffering the whole payload.
pub async fn streaming_sink<S>(path: &Path, chunks: S) -> Result<u64, FileStoreError>
where
    S: futures_util::Stream<Item = std::io::Result<Vec<u8>>>,
{
    futures_util::pin_mut!(chunks);
    let mut file = fs::File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = futures_util::StreamExt::next(&mut chunks).await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_roundtrip_is_idempotent() {
        let name = "../../etc/passwd";
        let once = sanitize_name(name).unwrap();
        let twice = sanitize_name(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_rejects_null_byte() {
        assert!(matches!(
            sanitize_name("bad\0name.txt"),
            Err(FileStoreError::NullByteInName)
        ));
    }

    #[test]
    fn is_within_rejects_traversal() {
        let root = Path::new("/srv/downloads");
        assert!(!is_within(root, Path::new("/srv/downloads/../../etc/passwd")));
        assert!(is_within(root, Path::new("/srv/downloads/a.txt")));
        assert!(is_within(root, root));
    }

    #[tokio::test]
    async fn unique_name_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.txt"), b"x").await.unwrap();
        let name = unique_name(dir.path(), "a.txt").await;
        assert_eq!(name, "a (1).txt");
    }

    #[tokio::test]
    async fn chunk_writer_random_offset_then_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("out.bin");
        let mut writer = ChunkWriter::open(&final_path, 8).await.unwrap();
        writer.write_at(4, b"1234").await.unwrap();
        writer.write_at(0, b"abcd").await.unwrap();
        let path = writer.finalize().await.unwrap();
        let data = tokio::fs::read(&path).await.unwrap();
        assert_eq!(&data, b"abcd1234");
    }

    #[tokio::test]
    async fn abort_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("out.bin");
        let writer = ChunkWriter::open(&final_path, 4).await.unwrap();
        let temp_path = temp_sibling(&final_path);
        writer.abort().await;
        assert!(tokio::fs::metadata(&temp_path).await.is_err());
    }

    #[tokio::test]
    async fn read_whole_rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, vec![0u8; 100]).await.unwrap();
        assert!(matches!(
            read_whole(&path, 10).await,
            Err(FileStoreError::TooLargeForDirectRead)
        ));
        assert_eq!(read_whole(&path, 1000).await.unwrap().len(), 100);
    }

    #[tokio::test]
    async fn streaming_sink_writes_every_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let chunks = futures_util::stream::iter(vec![
            Ok::<_, std::io::Error>(b"abc".to_vec()),
            Ok(b"def".to_vec()),
        ]);
        let written = streaming_sink(&path, chunks).await.unwrap();
        assert_eq!(written, 6);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"abcdef");
    }
}
