//! Cross-storage copies.
//!
//! A copy between two storages runs as a background task. Files are
//! streamed from the source link into an upload on the destination;
//! directories are recreated and fan out into one child task per entry.

use std::sync::Arc;

use futures::FutureExt;
use tracing::debug;

use strata_types::path;
use strata_types::{LinkArgs, ListArgs};

use crate::op::Dispatcher;
use crate::task::{TaskContext, TaskManager};
use crate::vfs::{ByteReader, FileStream, FsError, FsResult, HttpRange, Link, MountedStorage};

/// Open a byte stream over a resolved link.
///
/// Links backed by a range reader or a local file are read directly.
/// Remote URLs are not fetched.
pub async fn stream_from_link(link: &Link) -> FsResult<ByteReader> {
    if let Some(reader) = &link.reader {
        return reader.range_read(HttpRange::full()).await;
    }
    if let Some(file_path) = &link.file_path {
        let file = tokio::fs::File::open(file_path).await?;
        return Ok(Box::new(file));
    }
    Err(FsError::NotImplemented("streaming from a remote url"))
}

/// Submits and runs copy tasks between storages.
#[derive(Clone)]
pub struct Transfer {
    ops: Arc<Dispatcher>,
    tasks: TaskManager,
}

impl Transfer {
    pub fn new(ops: Arc<Dispatcher>, tasks: TaskManager) -> Self {
        Self { ops, tasks }
    }

    /// Queue a copy of `src_path` on `src` into `dst_dir` on `dst`.
    ///
    /// Paths are inside their storages. Returns the task id.
    pub fn submit(
        &self,
        src: Arc<MountedStorage>,
        src_path: String,
        dst: Arc<MountedStorage>,
        dst_dir: String,
    ) -> FsResult<u64> {
        let name = format!(
            "copy [{}]({}) to [{}]({})",
            src.mount_path(),
            src_path,
            dst.mount_path(),
            dst_dir
        );
        let transfer = self.clone();
        self.tasks.submit(name, move |ctx| {
            async move { transfer.run(&ctx, &src, &src_path, &dst, &dst_dir).await }.boxed()
        })
    }

    async fn run(
        &self,
        ctx: &TaskContext,
        src: &Arc<MountedStorage>,
        src_path: &str,
        dst: &Arc<MountedStorage>,
        dst_dir: &str,
    ) -> FsResult<()> {
        if ctx.is_cancelled() {
            return Err(FsError::Canceled);
        }
        let obj = self.ops.get(src, src_path).await?;

        if obj.is_dir {
            let target = path::join(dst_dir, &obj.name);
            self.ops.make_dir(dst, &target, false).await?;
            let children = self.ops.list(src, src_path, &ListArgs::default()).await?;
            debug!(task = ctx.id(), src = %src_path, entries = children.len(), "fanning out directory copy");
            for child in children {
                self.submit(
                    Arc::clone(src),
                    path::join(src_path, &child.name),
                    Arc::clone(dst),
                    target.clone(),
                )?;
            }
            ctx.set_progress(100.0);
            return Ok(());
        }

        let (link, file) = self.ops.link(src, src_path, &LinkArgs::default()).await?;
        let reader = stream_from_link(&link).await?;
        let stream = FileStream::new(file, reader);
        self.ops
            .put(dst, dst_dir, stream, ctx.progress_fn(), false, ctx.token())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_stream_from_file_link() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        tokio::fs::write(&file, b"on disk").await.unwrap();

        let mut out = Vec::new();
        stream_from_link(&Link::file(&file))
            .await
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        assert_eq!(out, b"on disk");
    }

    #[tokio::test]
    async fn test_url_links_are_not_fetched() {
        let err = match stream_from_link(&Link::url("https://example.invalid/f")).await {
            Ok(_) => panic!("url link should not stream"),
            Err(e) => e,
        };
        assert!(matches!(err, FsError::NotImplemented(_)));
    }
}
