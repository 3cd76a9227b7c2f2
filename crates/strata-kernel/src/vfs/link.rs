//! Download links and upload streams.

use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncRead, ReadBuf};

use strata_types::Obj;

use super::error::FsResult;

/// Byte range of a read. `length: None` reads to the end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HttpRange {
    pub start: u64,
    pub length: Option<u64>,
}

impl HttpRange {
    pub fn full() -> Self {
        Self::default()
    }
}

/// Boxed byte source handed out by links and consumed by uploads.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Random-access byte source behind a link.
#[async_trait]
pub trait RangeRead: Send + Sync {
    async fn range_read(&self, range: HttpRange) -> FsResult<ByteReader>;
}

/// In-memory [`RangeRead`], used by drivers that already hold the bytes.
#[derive(Clone)]
pub struct BytesRangeReader {
    data: Arc<[u8]>,
}

impl BytesRangeReader {
    pub fn new(data: Arc<[u8]>) -> Self {
        Self { data }
    }
}

#[async_trait]
impl RangeRead for BytesRangeReader {
    async fn range_read(&self, range: HttpRange) -> FsResult<ByteReader> {
        let len = self.data.len();
        let start = usize::try_from(range.start).unwrap_or(len).min(len);
        let end = match range.length {
            Some(n) => start.saturating_add(usize::try_from(n).unwrap_or(usize::MAX)).min(len),
            None => len,
        };
        Ok(Box::new(Cursor::new(self.data[start..end].to_vec())))
    }
}

/// How a caller retrieves a file's bytes.
///
/// A link carries exactly one of: a URL (with headers), a [`RangeRead`]
/// source, or a local `file_path`. `expiration` bounds how long it may be
/// cached; links without one are never cached.
#[derive(Clone, Default, Serialize)]
pub struct Link {
    pub url: String,
    pub header: HashMap<String, String>,
    #[serde(skip)]
    pub reader: Option<Arc<dyn RangeRead>>,
    #[serde(skip)]
    pub file_path: Option<PathBuf>,
    pub expiration: Option<Duration>,
    /// The link is bound to the requesting client's address.
    #[serde(skip)]
    pub ip_cache_key: bool,
    /// Suggested parallel range requests for a downloader.
    pub concurrency: usize,
    pub part_size: usize,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("url", &self.url)
            .field("header", &self.header)
            .field("reader", &self.reader.as_ref().map(|_| "<range reader>"))
            .field("file_path", &self.file_path)
            .field("expiration", &self.expiration)
            .field("ip_cache_key", &self.ip_cache_key)
            .finish()
    }
}

impl Link {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn reader(reader: Arc<dyn RangeRead>) -> Self {
        Self {
            reader: Some(reader),
            ..Default::default()
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }
}

/// An upload in flight: the target object's metadata plus its bytes.
pub struct FileStream {
    pub obj: Obj,
    pub mimetype: String,
    /// Object already present at the destination, if the dispatcher left
    /// it in place for the driver to overwrite.
    pub exist: Option<Obj>,
    reader: ByteReader,
}

impl fmt::Debug for FileStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStream")
            .field("obj", &self.obj)
            .field("mimetype", &self.mimetype)
            .field("exist", &self.exist)
            .finish_non_exhaustive()
    }
}

impl FileStream {
    pub fn new(obj: Obj, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            obj,
            mimetype: "application/octet-stream".to_string(),
            exist: None,
            reader: Box::new(reader),
        }
    }

    pub fn from_bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let obj = Obj::file(name, data.len() as u64).with_modified(SystemTime::now());
        Self::new(obj, Cursor::new(data))
    }

    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = mimetype.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.obj.name
    }

    pub fn size(&self) -> u64 {
        self.obj.size
    }
}

impl AsyncRead for FileStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_bytes_range_reader_slices() {
        let reader = BytesRangeReader::new(Arc::from(&b"hello world"[..]));
        let mut out = String::new();
        reader
            .range_read(HttpRange { start: 6, length: Some(3) })
            .await
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        assert_eq!(out, "wor");

        let mut tail = Vec::new();
        reader
            .range_read(HttpRange { start: 100, length: None })
            .await
            .unwrap()
            .read_to_end(&mut tail)
            .await
            .unwrap();
        assert!(tail.is_empty());
    }

    #[tokio::test]
    async fn test_file_stream_reads_through() {
        let mut stream = FileStream::from_bytes("a.txt", b"abc".to_vec());
        assert_eq!(stream.size(), 3);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abc");
    }
}
