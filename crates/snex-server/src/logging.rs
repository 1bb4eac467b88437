//! Process logging: formatted tracing output teed to stderr and to a
//! per-process log file in the system temp directory. Failing to create the
//! file is non-fatal; logs then go to stderr alone.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
pub struct TeeMakeWriter {
    file: Option<Arc<Mutex<File>>>,
}

pub struct TeeWriter {
    stderr: io::Stderr,
    file: Option<Arc<Mutex<File>>>,
}

impl<'a> MakeWriter<'a> for TeeMakeWriter {
    type Writer = TeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        TeeWriter {
            stderr: io::stderr(),
            file: self.file.clone(),
        }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(file) = &self.file {
            // Log-file trouble must never take the process down.
            let _ = file.lock().expect("log file poisoned").write_all(buf);
        }
        self.stderr.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = &self.file {
            let _ = file.lock().expect("log file poisoned").flush();
        }
        self.stderr.flush()
    }
}

fn log_file_path() -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    std::env::temp_dir().join(format!("snex-{stamp}.log"))
}

/// Install the global subscriber. Returns the log file path when one was
/// created.
pub fn init(log_level: &str) -> Option<PathBuf> {
    let path = log_file_path();
    let file = match File::create(&path) {
        Ok(file) => Some(Arc::new(Mutex::new(file))),
        Err(err) => {
            eprintln!("could not open log file {}: {err}", path.display());
            None
        }
    };
    let created = file.is_some().then(|| path.clone());

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(TeeMakeWriter { file })
        .init();

    created
}
