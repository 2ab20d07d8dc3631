// Copyright 2024 The imgimport Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use core::pin::Pin;
use core::task::{Context, Poll, ready};
use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt};
use imgimport_error::{Code, Error, ResultExt, make_err};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;

use crate::operations::StorageOperations;
use crate::types::{ObjectAttrs, ObjectPath};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

/// Message sent from an `ObjectWriter` to its upload task.
#[derive(Debug)]
pub enum UploadChunk {
    Data(Bytes),
    /// The writer was closed cleanly, the upload may be committed.
    Finish,
}

/// Body of an upload. Ends after `UploadChunk::Finish`; if the sending
/// side goes away first the stream yields an `Aborted` error so the
/// backend never commits a partial object.
#[derive(Debug)]
pub struct UploadStream {
    rx: mpsc::Receiver<UploadChunk>,
    done: bool,
}

impl UploadStream {
    pub fn channel(depth: usize) -> (mpsc::Sender<UploadChunk>, Self) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (tx, Self { rx, done: false })
    }

    /// Drain the whole stream into memory.
    pub async fn collect_bytes(self) -> Result<Bytes, Error> {
        let chunks: Vec<Bytes> = self.try_collect().await?;
        Ok(chunks.concat().into())
    }
}

impl Stream for UploadStream {
    type Item = Result<Bytes, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match ready!(self.rx.poll_recv(cx)) {
            Some(UploadChunk::Data(data)) => Poll::Ready(Some(Ok(data))),
            Some(UploadChunk::Finish) => {
                self.done = true;
                Poll::Ready(None)
            }
            None => {
                self.done = true;
                Poll::Ready(Some(Err(make_err!(
                    Code::Aborted,
                    "Writer went away before it was closed"
                ))))
            }
        }
    }
}

/// Write side of an object. Data is handed to an upload task through a
/// bounded channel; the object is committed by `close`. Dropping the writer
/// closes the channel without `Finish`, so the upload task fails with
/// `Aborted` and discards what it was sent.
#[derive(Debug)]
pub struct ObjectWriter {
    path: ObjectPath,
    tx: Option<mpsc::Sender<UploadChunk>>,
    upload: Option<JoinHandle<Result<ObjectAttrs, Error>>>,
}

impl ObjectWriter {
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(
        ops: Arc<dyn StorageOperations>,
        path: ObjectPath,
        content_type: String,
        queue_depth: usize,
    ) -> Self {
        let (tx, stream) = UploadStream::channel(queue_depth);
        let upload_path = path.clone();
        let upload = tokio::spawn(async move {
            ops.write_object(&upload_path, &content_type, stream).await
        });
        Self {
            path,
            tx: Some(tx),
            upload: Some(upload),
        }
    }

    pub const fn object_path(&self) -> &ObjectPath {
        &self.path
    }

    pub async fn write(&mut self, data: Bytes) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        let tx = self.tx.as_ref().err_tip_with_code(|_| {
            (
                Code::FailedPrecondition,
                format!("Writer for {} already failed", self.path),
            )
        })?;
        if tx.send(UploadChunk::Data(data)).await.is_err() {
            return Err(self.upload_failure().await);
        }
        Ok(())
    }

    /// Copy `reader` to the end in chunks of `chunk_size` bytes. Returns
    /// the number of bytes copied.
    pub async fn copy_from_reader<R>(&mut self, reader: &mut R, chunk_size: usize) -> Result<u64, Error>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let mut copied = 0u64;
        loop {
            let mut buf = BytesMut::with_capacity(chunk_size.max(1));
            let read = reader
                .read_buf(&mut buf)
                .await
                .err_tip(|| format!("While reading data for {}", self.path))?;
            if read == 0 {
                return Ok(copied);
            }
            copied += read as u64;
            self.write(buf.freeze()).await?;
        }
    }

    /// Commit everything written so far.
    pub async fn close(mut self) -> Result<ObjectAttrs, Error> {
        let (Some(tx), Some(upload)) = (self.tx.take(), self.upload.take()) else {
            return Err(make_err!(
                Code::FailedPrecondition,
                "Writer for {} already failed",
                self.path
            ));
        };
        // A failed send means the upload already ended, its result says why.
        drop(tx.send(UploadChunk::Finish).await);
        drop(tx);
        upload
            .await?
            .err_tip(|| format!("While closing writer for {}", self.path))
    }

    /// The channel closed under us: the upload task ended early.
    async fn upload_failure(&mut self) -> Error {
        self.tx = None;
        let err = match self.upload.take() {
            Some(upload) => match upload.await {
                Ok(Ok(_)) => make_err!(Code::Internal, "Upload ended before the writer was closed"),
                Ok(Err(err)) => err,
                Err(err) => err.into(),
            },
            None => make_err!(Code::Internal, "Upload task is gone"),
        };
        err.append(format!("While writing to {}", self.path))
    }
}

type IoByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Read side of an object. Dropping it releases the connection.
pub struct ObjectReader {
    path: ObjectPath,
    inner: StreamReader<IoByteStream, Bytes>,
}

impl core::fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObjectReader")
            .field("path", &self.path)
            .finish()
    }
}

impl ObjectReader {
    pub fn new(path: ObjectPath, stream: ByteStream) -> Self {
        let stream: IoByteStream = Box::pin(stream.map(|chunk| chunk.map_err(Error::to_std_err)));
        Self {
            path,
            inner: StreamReader::new(stream),
        }
    }

    pub const fn object_path(&self) -> &ObjectPath {
        &self.path
    }

    /// Read the remaining content into memory.
    pub async fn read_all(mut self) -> Result<Bytes, Error> {
        let mut content = Vec::new();
        self.read_to_end(&mut content)
            .await
            .err_tip(|| format!("While reading {}", self.path))?;
        Ok(content.into())
    }
}

impl AsyncRead for ObjectReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}
