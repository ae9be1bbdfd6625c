//! CSV file outlet.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::plugin::{PluginError, Sink};
use crate::report::{Report, write_csv};

/// Path argument selecting standard output.
const STDOUT_PATH: &str = "-";

/// Appends each batch as `name,unix_seconds,value` rows to a file, or to
/// stdout when the path is `-`.
pub struct FileSink {
    path: Option<PathBuf>,
    out: Option<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl FileSink {
    pub fn new(args: &[String]) -> Self {
        Self {
            path: args
                .first()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            out: None,
        }
    }
}

impl std::fmt::Debug for FileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSink")
            .field("path", &self.path)
            .field("open", &self.out.is_some())
            .finish()
    }
}

#[async_trait::async_trait]
impl Sink for FileSink {
    async fn open(&mut self) -> Result<(), PluginError> {
        let path = self.path.as_ref().ok_or_else(|| {
            PluginError::InvalidArgument("out-file requires a path or '-'".to_string())
        })?;

        if path.as_os_str() == STDOUT_PATH {
            self.out = Some(Box::new(tokio::io::stdout()));
        } else {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            tracing::debug!(path = %path.display(), "Output file opened");
            self.out = Some(Box::new(file));
        }
        Ok(())
    }

    async fn handle(&mut self, batch: &[Arc<Report>]) -> Result<(), PluginError> {
        let out = self.out.as_mut().ok_or(PluginError::NotOpen)?;
        let mut buf = String::new();
        write_csv(batch, &mut buf);
        out.write_all(buf.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        if let Some(mut out) = self.out.take() {
            out.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Record;
    use chrono::{TimeZone, Utc};

    fn batch() -> Vec<Arc<Report>> {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        vec![Arc::new(Report::new(
            ts,
            vec![Record::new("cpu.percent", 12.34, 1)],
        ))]
    }

    #[tokio::test]
    async fn test_file_sink_appends_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "existing\n").unwrap();

        let mut sink = FileSink::new(&[path.to_string_lossy().into_owned()]);
        sink.open().await.unwrap();
        sink.handle(&batch()).await.unwrap();
        sink.handle(&batch()).await.unwrap();
        sink.close().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "existing\ncpu.percent,1700000000,12.3\ncpu.percent,1700000000,12.3\n"
        );
    }

    #[tokio::test]
    async fn test_file_sink_open_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.csv");

        let mut sink = FileSink::new(&[path.to_string_lossy().into_owned()]);
        assert!(matches!(sink.open().await, Err(PluginError::Io(_))));
    }

    #[tokio::test]
    async fn test_file_sink_requires_path() {
        let mut sink = FileSink::new(&[]);
        assert!(matches!(
            sink.open().await,
            Err(PluginError::InvalidArgument(_))
        ));
        assert!(matches!(
            sink.handle(&batch()).await,
            Err(PluginError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn test_file_sink_tolerates_empty_reports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let mut sink = FileSink::new(&[path.to_string_lossy().into_owned()]);
        sink.open().await.unwrap();
        let empty = vec![Arc::new(Report::new(Utc::now(), vec![]))];
        sink.handle(&empty).await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
