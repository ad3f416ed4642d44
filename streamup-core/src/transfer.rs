use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, ReadBuf};

use crate::config::DEFAULT_CHUNK_SIZE_BYTES;

pub type TransferResult<T> = Result<T, TransferError>;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("file {path} unreadable: {source}")]
    FileUnreadable { path: PathBuf, source: io::Error },
}

impl TransferError {
    fn unreadable(path: &Path, source: io::Error) -> Self {
        TransferError::FileUnreadable {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Receives transfer progress. `on_progress` values never decrease and end at 100;
/// `on_complete` fires once, after the last chunk.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, percent: f64);

    fn on_complete(&self) {}
}

/// Reads files in fixed-size chunks.
#[derive(Debug, Clone, Copy)]
pub struct StreamingTransfer {
    chunk_size: usize,
}

impl Default for StreamingTransfer {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE_BYTES)
    }
}

impl StreamingTransfer {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub async fn open(
        &self,
        path: &Path,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> TransferResult<FileChunks> {
        let file = File::open(path)
            .await
            .map_err(|err| TransferError::unreadable(path, err))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|err| TransferError::unreadable(path, err))?;
        if !metadata.is_file() {
            return Err(TransferError::unreadable(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }
        Ok(FileChunks {
            file,
            path: path.to_path_buf(),
            chunk_size: self.chunk_size,
            total: metadata.len(),
            sent: 0,
            buffer: Vec::new(),
            filled: 0,
            eof: false,
            finished: false,
            observer,
        })
    }
}

/// Stream of file chunks. At most one chunk is held in memory.
///
/// The byte count is pinned when the file is opened; a file that shrinks or grows while
/// streaming yields `FileUnreadable` instead of a body that disagrees with `Content-Length`.
pub struct FileChunks {
    file: File,
    path: PathBuf,
    chunk_size: usize,
    total: u64,
    sent: u64,
    buffer: Vec<u8>,
    filled: usize,
    eof: bool,
    finished: bool,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl FileChunks {
    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    /// Size of the next read buffer: the bytes still expected, capped at `chunk_size`.
    /// Never zero, so end of file and growth past the pinned length are still observed.
    fn next_buffer_len(&self) -> usize {
        let remaining = self.total.saturating_sub(self.sent);
        remaining.clamp(1, self.chunk_size as u64) as usize
    }

    fn fail(&mut self, kind: io::ErrorKind, message: String) -> TransferError {
        self.finished = true;
        TransferError::unreadable(&self.path, io::Error::new(kind, message))
    }

    fn report_progress(&self) {
        if let Some(observer) = &self.observer {
            let percent = if self.total == 0 {
                100.0
            } else {
                (self.sent as f64 / self.total as f64 * 100.0).min(100.0)
            };
            observer.on_progress(percent);
        }
    }

    fn complete(&mut self) {
        self.finished = true;
        if self.sent == 0 {
            self.report_progress();
        }
        if let Some(observer) = &self.observer {
            observer.on_complete();
        }
    }
}

impl Stream for FileChunks {
    type Item = TransferResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if this.buffer.is_empty() {
            this.buffer = vec![0; this.next_buffer_len()];
        }
        while !this.eof && this.filled < this.buffer.len() {
            let mut read_buf = ReadBuf::new(&mut this.buffer[this.filled..]);
            match Pin::new(&mut this.file).poll_read(cx, &mut read_buf) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(source)) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(TransferError::unreadable(&this.path, source))));
                }
                Poll::Ready(Ok(())) => {
                    let read = read_buf.filled().len();
                    if read == 0 {
                        this.eof = true;
                    } else {
                        this.filled += read;
                    }
                }
            }
        }

        if this.filled == 0 {
            if this.sent != this.total {
                let message = format!(
                    "file shrank during transfer: {} of {} bytes read",
                    this.sent, this.total
                );
                return Poll::Ready(Some(Err(this.fail(io::ErrorKind::UnexpectedEof, message))));
            }
            this.complete();
            return Poll::Ready(None);
        }

        let mut chunk = std::mem::take(&mut this.buffer);
        chunk.truncate(this.filled);
        this.filled = 0;
        this.sent += chunk.len() as u64;
        if this.sent > this.total {
            let message = format!("file grew during transfer beyond {} bytes", this.total);
            return Poll::Ready(Some(Err(this.fail(io::ErrorKind::InvalidData, message))));
        }
        this.report_progress();
        Poll::Ready(Some(Ok(Bytes::from(chunk))))
    }
}
