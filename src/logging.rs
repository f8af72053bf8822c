use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::fmt::MakeWriter;

/// A `MakeWriter` that discards everything until a log file is attached.
///
/// The subscriber is installed before the command is known; only the
/// commands that launch QEMU attach a file, so read-only commands such as
/// `state` never touch the logs directory.
#[derive(Clone, Default)]
pub struct LaunchLog {
    file: Arc<Mutex<Option<File>>>,
}

impl LaunchLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start appending to `path`, creating parent directories.
    pub fn attach(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *lock(&self.file) = Some(file);
        Ok(())
    }
}

// A panic while holding the lock only loses a log line; keep logging.
fn lock(file: &Mutex<Option<File>>) -> MutexGuard<'_, Option<File>> {
    file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct LaunchLogWriter {
    file: Arc<Mutex<Option<File>>>,
}

impl Write for LaunchLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match lock(&self.file).as_mut() {
            Some(f) => f.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match lock(&self.file).as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for LaunchLog {
    type Writer = LaunchLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LaunchLogWriter {
            file: self.file.clone(),
        }
    }
}
