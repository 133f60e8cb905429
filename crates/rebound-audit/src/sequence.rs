//! Sequential log-file numbering.
//!
//! Log files are named `NNNNN-<operation>.md`. The next number for a
//! folder is `max(existing) + 1` across every log kind, so request and
//! error logs interleave into one contiguous sequence. Scanning and file
//! creation happen under one mutex, and the file is created immediately
//! to claim the number before any content is written.

use lazy_static::lazy_static;
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

lazy_static! {
    static ref LOG_NUMBER_RE: Regex = Regex::new(r"^(\d+)-.+\.md$").unwrap();
}

/// Allocates unique, contiguous log numbers per folder.
pub struct SequenceAllocator {
    lock: Mutex<()>,
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
        }
    }

    /// Next number for `folder`, ignoring gaps (next = max + 1).
    ///
    /// Callers that need a unique file must use [`claim`](Self::claim);
    /// this scan alone is not a reservation.
    pub fn next_number(&self, folder: &Path) -> u32 {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        scan_max(folder) + 1
    }

    /// Atomically claim the next number in `folder` by creating the file
    /// `NNNNN-<operation>.md` (empty) and returning its path.
    pub fn claim(&self, folder: &Path, operation: &str) -> io::Result<PathBuf> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        fs::create_dir_all(folder)?;
        let number = scan_max(folder) + 1;
        let filename = format!("{:05}-{}.md", number, operation);
        let path = folder.join(filename);
        // create the (empty) file now so the number is taken before the
        // lock is released
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(path)
    }
}

fn scan_max(folder: &Path) -> u32 {
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut max = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(captures) = LOG_NUMBER_RE.captures(name) {
            if let Ok(number) = captures[1].parse::<u32>() {
                max = max.max(number);
            }
        }
    }
    max
}
