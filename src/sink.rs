//! Durable recording and console echo of positive results.
use crate::scanner::ResultQueue;
use colored::Colorize;
use log::warn;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Appends every result line to a file and echoes it to the console.
///
/// Persistence is best-effort: a file that cannot be opened or written
/// is logged once per failure and the sweep carries on. The console echo
/// is the authoritative output.
pub struct ResultSink {
    file: Option<File>,
    path: PathBuf,
    greppable: bool,
    accessible: bool,
}

impl ResultSink {
    /// Opens `path` for appending, creating it when missing.
    pub async fn open(path: &Path, greppable: bool, accessible: bool) -> Self {
        let file = match OpenOptions::new().create(true).append(true).open(path).await {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("Could not open {}: {}", path.display(), e);
                None
            }
        };

        Self {
            file,
            path: path.to_owned(),
            greppable,
            accessible,
        }
    }

    /// Drains the results queue until the engine closes it.
    pub async fn run(mut self, results: Arc<ResultQueue>) {
        while let Some(line) = results.pop().await {
            self.record(&line).await;
        }
    }

    async fn record(&mut self, line: &str) {
        self.echo(line);

        let Some(file) = self.file.as_mut() else {
            return;
        };
        // One write per line so a kill loses at most the line in flight.
        if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
            warn!("Write to {} failed: {}", self.path.display(), e);
        }
    }

    fn echo(&self, line: &str) {
        if self.greppable {
            println!("{line}");
        } else if self.accessible {
            println!("Open {line}");
        } else {
            println!("Open {}", line.purple());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ResultSink;
    use crate::input::OverflowPolicy;
    use crate::scanner::ResultQueue;
    use std::sync::Arc;

    #[tokio::test]
    async fn appends_lines_in_arrival_order() {
        let path = std::env::temp_dir().join("rdpsweep-sink-order.txt");
        let _ = std::fs::remove_file(&path);

        let queue = Arc::new(ResultQueue::new(4, OverflowPolicy::Block));
        queue.push("10.0.0.5:3389".to_owned()).await;
        queue.push("10.0.0.6:3389".to_owned()).await;
        queue.close();

        let sink = ResultSink::open(&path, true, false).await;
        sink.run(Arc::clone(&queue)).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "10.0.0.5:3389\n10.0.0.6:3389\n");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn unwritable_file_is_not_fatal() {
        let path = std::env::temp_dir().join("no-such-dir-rdpsweep/out.txt");

        let queue = Arc::new(ResultQueue::new(4, OverflowPolicy::Block));
        queue.push("10.0.0.5:3389".to_owned()).await;
        queue.close();

        // The sink must still drain the queue with no file behind it.
        let sink = ResultSink::open(&path, true, false).await;
        sink.run(Arc::clone(&queue)).await;
        assert!(queue.is_empty());
    }
}
