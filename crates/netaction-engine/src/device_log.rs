use chrono::Local;
use log::warn;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Append-only per-device transcript. Write failures are reported through
/// `log` and otherwise ignored so a full disk never aborts a device run.
pub struct DeviceLog {
    path: Option<PathBuf>,
    file: Option<File>,
}

impl DeviceLog {
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(DeviceLog {
            path: Some(path.to_path_buf()),
            file: Some(file),
        })
    }

    pub fn disabled() -> Self {
        DeviceLog {
            path: None,
            file: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn append(&mut self, text: &str) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        if let Err(e) = file.write_all(text.as_bytes()).await {
            warn!("Failed to append to device log: {}", e);
            return;
        }
        if let Err(e) = file.flush().await {
            warn!("Failed to flush device log: {}", e);
        }
    }

    /// Command text and its raw output, verbatim.
    pub async fn command(&mut self, command: &str, output: &str) {
        self.append(&format!("Raw output for command '{}':\n{}\n", command, output))
            .await;
    }

    pub async fn event(&mut self, message: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        self.append(&format!("[{}] {}\n", stamp, message)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_transcript_is_appended() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("r1.log");
        tokio_test::block_on(async {
            let mut log = DeviceLog::open(&path).await.unwrap();
            log.command("show clock", "10:15:42 UTC").await;
            let mut reopened = DeviceLog::open(&path).await.unwrap();
            reopened.event("second run").await;
        });

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Raw output for command 'show clock':\n10:15:42 UTC\n"));
        assert!(text.trim_end().ends_with("second run"));
    }

    #[test]
    fn test_disabled_log_writes_nothing() {
        let mut log = DeviceLog::disabled();
        tokio_test::block_on(log.event("dropped"));
        assert!(log.path().is_none());
    }
}
