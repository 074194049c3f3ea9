use crate::error::TransferError;
use std::collections::HashSet;
use std::path::PathBuf;
use syndro_store::ChunkWriter;
use tokio::sync::Mutex;

/// Per-RAM-class parallel-transfer tuning (spec §4.6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelConfig {
    pub connections: usize,
    pub chunk_size: u64,
    pub min_parallel: u64,
}

impl ParallelConfig {
    pub const LOW: Self = Self { connections: 1, chunk_size: 256 * 1024, min_parallel: 10 * 1024 * 1024 };
    pub const MEDIUM: Self = Self { connections: 2, chunk_size: 512 * 1024, min_parallel: 5 * 1024 * 1024 };
    pub const HIGH: Self = Self { connections: 8, chunk_size: 2 * 1024 * 1024, min_parallel: 10 * 1024 * 1024 };
    pub const MAX: Self = Self { connections: 12, chunk_size: 4 * 1024 * 1024, min_parallel: 10 * 1024 * 1024 };

    /// Selects the tuning band for a detected RAM size, in megabytes.
    pub fn for_ram_mb(ram_mb: u64) -> Self {
        if ram_mb <= 2048 {
            Self::LOW
        } else if ram_mb <= 4096 {
            Self::MEDIUM
        } else if ram_mb <= 8192 {
            Self::HIGH
        } else {
            Self::MAX
        }
    }

    pub fn total_chunks(&self, file_size: u64) -> u32 {
        ((file_size + self.chunk_size - 1) / self.chunk_size).max(1) as u32
    }

    /// Parallel transfer is used when exactly one item is being sent and it
    /// meets the size floor for this RAM class.
    pub fn should_use_parallel(&self, item_count: usize, file_size: u64) -> bool {
        item_count == 1 && file_size >= self.min_parallel
    }
}

/// Server-side bookkeeping for one in-flight parallel receive: a sparsely
/// preallocated temp file plus the set of chunk indexes written so far.
/// Generalized from the teacher's fixed-size `ChunkBitfield`
/// (`haven-fast-transfer/src/bitfield.rs`) to an unbounded `HashSet<u32>`,
/// since file size here is not known at compile time.
pub struct ChunkWriterState {
    writer: Mutex<Option<ChunkWriter>>,
    received: Mutex<HashSet<u32>>,
    pub total_size: u64,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub sender_id: uuid::Uuid,
    pub file_name: String,
    pub final_path: PathBuf,
}

impl ChunkWriterState {
    pub async fn open(
        final_path: PathBuf,
        total_size: u64,
        chunk_size: u64,
        sender_id: uuid::Uuid,
        file_name: String,
    ) -> Result<Self, TransferError> {
        let writer = ChunkWriter::open(&final_path, total_size).await?;
        let total_chunks = ((total_size + chunk_size - 1) / chunk_size).max(1) as u32;
        Ok(Self {
            writer: Mutex::new(Some(writer)),
            received: Mutex::new(HashSet::new()),
            total_size,
            total_chunks,
            chunk_size,
            sender_id,
            file_name,
            final_path,
        })
    }

    /// Writes one chunk at its declared offset. Duplicate indexes are
    /// silently ignored; out-of-range indexes are rejected.
    pub async fn write_chunk(&self, index: u32, data: &[u8]) -> Result<(), TransferError> {
        if index >= self.total_chunks {
            return Err(TransferError::InvalidInput(format!(
                "chunk index {index} out of range (total {})",
                self.total_chunks
            )));
        }
        {
            let mut received = self.received.lock().await;
            if !received.insert(index) {
                return Ok(());
            }
        }
        let offset = index as u64 * self.chunk_size;
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().expect("chunk writer used after finalize/abort");
        writer.write_at(offset, data).await?;
        Ok(())
    }

    pub async fn bytes_received(&self) -> u64 {
        let received = self.received.lock().await;
        (received.len() as u64 * self.chunk_size).min(self.total_size)
    }

    pub async fn is_complete(&self) -> bool {
        self.received.lock().await.len() as u32 == self.total_chunks
    }

    pub async fn missing(&self) -> Vec<u32> {
        let received = self.received.lock().await;
        (0..self.total_chunks).filter(|i| !received.contains(i)).collect()
    }

    /// The temp sibling path, so its contents can be hashed for integrity
    /// verification before `finalize` makes them visible under their final
    /// name (spec invariant: the final path is never visible pre-verify).
    pub async fn temp_path(&self) -> PathBuf {
        self.writer
            .lock()
            .await
            .as_ref()
            .expect("chunk writer used after finalize/abort")
            .temp_path()
            .to_path_buf()
    }

    /// Renames the temp file into place. Takes `&self` rather than `self`
    /// since a transient `Arc` clone may still be held by an in-flight
    /// `/transfer/chunk` request when `/transfer/parallel/complete` runs.
    pub async fn finalize(&self) -> Result<PathBuf, TransferError> {
        let writer = self.writer.lock().await.take().expect("finalize called twice");
        Ok(writer.finalize().await?)
    }

    pub async fn abort(&self) {
        if let Some(writer) = self.writer.lock().await.take() {
            writer.abort().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_class_selection() {
        assert_eq!(ParallelConfig::for_ram_mb(1024), ParallelConfig::LOW);
        assert_eq!(ParallelConfig::for_ram_mb(3000), ParallelConfig::MEDIUM);
        assert_eq!(ParallelConfig::for_ram_mb(6000), ParallelConfig::HIGH);
        assert_eq!(ParallelConfig::for_ram_mb(16000), ParallelConfig::MAX);
    }

    #[test]
    fn should_use_parallel_requires_single_large_item() {
        let cfg = ParallelConfig::HIGH;
        assert!(cfg.should_use_parallel(1, 20 * 1024 * 1024));
        assert!(!cfg.should_use_parallel(2, 20 * 1024 * 1024));
        assert!(!cfg.should_use_parallel(1, 1024));
    }

    #[tokio::test]
    async fn duplicate_chunk_write_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let state = ChunkWriterState::open(path, 8, 4, uuid::Uuid::new_v4(), "f".into())
            .await
            .unwrap();
        state.write_chunk(0, b"abcd").await.unwrap();
        state.write_chunk(0, b"xxxx").await.unwrap();
        state.write_chunk(1, b"1234").await.unwrap();
        assert!(state.is_complete().await);
        let path = state.finalize().await.unwrap();
        let data = tokio::fs::read(&path).await.unwrap();
        assert_eq!(&data, b"abcd1234");
    }

    #[tokio::test]
    async fn missing_lists_unwritten_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let state = ChunkWriterState::open(path, 12, 4, uuid::Uuid::new_v4(), "f".into())
            .await
            .unwrap();
        state.write_chunk(0, b"abcd").await.unwrap();
        state.write_chunk(2, b"ijkl").await.unwrap();
        assert_eq!(state.missing().await, vec![1]);
        assert!(!state.is_complete().await);
    }

    #[tokio::test]
    async fn out_of_range_index_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let state = ChunkWriterState::open(path, 4, 4, uuid::Uuid::new_v4(), "f".into())
            .await
            .unwrap();
        assert!(state.write_chunk(5, b"abcd").await.is_err());
    }

    #[tokio::test]
    async fn temp_path_is_hashable_before_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let state = ChunkWriterState::open(path.clone(), 4, 4, uuid::Uuid::new_v4(), "f".into())
            .await
            .unwrap();
        state.write_chunk(0, b"abcd").await.unwrap();
        let temp_path = state.temp_path().await;
        assert!(tokio::fs::metadata(&temp_path).await.is_ok());
        assert!(tokio::fs::metadata(&path).await.is_err());
        state.finalize().await.unwrap();
        assert!(tokio::fs::metadata(&path).await.is_ok());
    }
}
