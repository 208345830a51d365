//! Single-file writers and the factory that opens them.

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use snafu::prelude::*;
use std::sync::Arc;
use tracing::debug;

use crate::bucket::{BucketWriter, InProgressFile};
use crate::committable::Committable;
use crate::emit;
use crate::error::{EncodeSnafu, WriteError};
use crate::metrics::events::{FileOpened, RecordsWritten};
use crate::staging::StagingFile;

/// Serializes one record into a file buffer.
pub trait RecordEncoder<R>: Send + Sync {
    fn encode(&self, record: &R, buf: &mut BytesMut) -> Result<(), serde_json::Error>;
}

/// Newline-delimited JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesEncoder;

impl<R: Serialize> RecordEncoder<R> for JsonLinesEncoder {
    fn encode(&self, record: &R, buf: &mut BytesMut) -> Result<(), serde_json::Error> {
        serde_json::to_writer(buf.writer(), record)?;
        buf.put_u8(b'\n');
        Ok(())
    }
}

/// Opens [`FileWriter`]s bound to staging files.
pub struct WriterFactory<R> {
    bucket_writer: Arc<dyn BucketWriter>,
    encoder: Arc<dyn RecordEncoder<R>>,
}

impl<R> Clone for WriterFactory<R> {
    fn clone(&self) -> Self {
        Self {
            bucket_writer: self.bucket_writer.clone(),
            encoder: self.encoder.clone(),
        }
    }
}

impl<R> std::fmt::Debug for WriterFactory<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterFactory")
            .field("bucket_writer", &self.bucket_writer)
            .finish_non_exhaustive()
    }
}

impl<R> WriterFactory<R> {
    pub fn new(
        bucket_writer: Arc<dyn BucketWriter>,
        encoder: impl RecordEncoder<R> + 'static,
    ) -> Self {
        Self {
            bucket_writer,
            encoder: Arc::new(encoder),
        }
    }

    pub fn bucket_writer(&self) -> &Arc<dyn BucketWriter> {
        &self.bucket_writer
    }

    /// Open a writer for a freshly allocated staging file.
    pub fn create(&self, file: StagingFile) -> FileWriter<R> {
        debug!(path = %file.staging_path, bucket = %file.bucket_id, "Opened file writer");
        emit!(FileOpened);

        FileWriter {
            bucket_id: file.bucket_id.clone(),
            file: self.bucket_writer.open_new(file),
            encoder: self.encoder.clone(),
            bucket_writer: self.bucket_writer.clone(),
        }
    }
}

/// Appends records to one staging file. Single use: closing consumes it.
pub struct FileWriter<R> {
    bucket_id: String,
    file: InProgressFile,
    encoder: Arc<dyn RecordEncoder<R>>,
    bucket_writer: Arc<dyn BucketWriter>,
}

impl<R> FileWriter<R> {
    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    pub fn record_count(&self) -> u64 {
        self.file.record_count()
    }

    pub fn write(&mut self, record: &R) -> Result<(), WriteError> {
        let encoder = &self.encoder;
        self.file
            .append(|buf| encoder.encode(record, buf))
            .with_context(|_| EncodeSnafu {
                path: self.file.staging_file().staging_path.to_string(),
            })?;
        emit!(RecordsWritten { count: 1 });
        Ok(())
    }

    /// Close cleanly; the committable carries a pending-file token.
    pub async fn close(self) -> Result<Committable, WriteError> {
        let (_pending, token) = self.bucket_writer.close_for_commit(self.file).await?;
        Ok(Committable::pending(self.bucket_id, token))
    }

    /// Close at an abort; the committable only allows cleanup.
    pub async fn abort(self) -> Result<Committable, WriteError> {
        let token = self.bucket_writer.close_for_recovery(self.file).await?;
        Ok(Committable::in_progress(self.bucket_id, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_lines_encoding() {
        let mut buf = BytesMut::new();
        JsonLinesEncoder.encode(&json!({"a": 1}), &mut buf).unwrap();
        JsonLinesEncoder.encode(&json!("x"), &mut buf).unwrap();

        assert_eq!(&buf[..], b"{\"a\":1}\n\"x\"\n");
    }
}
