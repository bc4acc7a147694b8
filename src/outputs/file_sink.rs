use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

const RECORD_SEPARATOR: &[u8] = b"\n";

/// Append-only mirror of every payload a worker publishes.
///
/// One sink per worker, open for the worker's lifetime. Each record is
/// flushed before `append` returns.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
    records: u64,
}

impl FileSink {
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            records: 0,
        })
    }

    /// Sink path for worker `id` out of `workers`. A single worker writes to
    /// `base` itself; several workers each get `<stem>.<id>.<ext>`.
    pub fn worker_path(base: &Path, id: usize, workers: usize) -> PathBuf {
        if workers <= 1 {
            return base.to_path_buf();
        }
        let stem = base
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "mirror".to_string());
        let name = match base.extension() {
            Some(ext) => format!("{}.{}.{}", stem, id, ext.to_string_lossy()),
            None => format!("{}.{}", stem, id),
        };
        base.with_file_name(name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub async fn append(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.file.write_all(payload).await?;
        self.file.write_all(RECORD_SEPARATOR).await?;
        self.file.flush().await?;
        self.records += 1;
        Ok(())
    }

    pub async fn close(mut self) -> std::io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_paths() {
        let base = Path::new("/var/log/varship/reports.ndjson");
        assert_eq!(FileSink::worker_path(base, 0, 1), base);
        assert_eq!(
            FileSink::worker_path(base, 2, 3),
            Path::new("/var/log/varship/reports.2.ndjson")
        );
        assert_eq!(
            FileSink::worker_path(Path::new("out"), 1, 2),
            Path::new("out.1")
        );
    }

    #[tokio::test]
    async fn appends_records_with_separator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mirror.log");

        let mut sink = FileSink::open(&path).await.unwrap();
        sink.append(b"{\"sequence\":0}").await.unwrap();
        sink.append(b"{\"sequence\":1}").await.unwrap();
        assert_eq!(sink.records(), 2);
        sink.close().await.unwrap();

        // Reopening appends instead of truncating.
        let mut sink = FileSink::open(&path).await.unwrap();
        sink.append(b"{\"sequence\":2}").await.unwrap();
        sink.close().await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "{\"sequence\":0}\n{\"sequence\":1}\n{\"sequence\":2}\n"
        );
    }
}
