//! Blocking wait for a cgroup to become empty.
//!
//! The kernel raises `IN_MODIFY` on `cgroup.events` whenever one of its
//! fields changes. The file is rewritten in place rather than appended to,
//! so each check reads it again from the start.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, WatchDescriptor};
use runexcl_common::error::{Result, RunexclError};

/// An open `cgroup.events` file with an inotify watch on it.
#[derive(Debug)]
pub struct EventsWatcher {
    path: PathBuf,
    file: File,
    inotify: Inotify,
    watch: WatchDescriptor,
}

impl EventsWatcher {
    /// Opens `path` and starts watching it for modifications.
    ///
    /// # Errors
    ///
    /// Returns [`RunexclError::Io`] if the file cannot be opened and
    /// [`RunexclError::Os`] if the inotify watch cannot be set up.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| RunexclError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let inotify = Inotify::init(InitFlags::IN_CLOEXEC).map_err(|e| RunexclError::Os {
            call: "inotify_init1",
            source: e.into(),
        })?;
        let watch = inotify
            .add_watch(path, AddWatchFlags::IN_MODIFY)
            .map_err(|e| RunexclError::Os {
                call: "inotify_add_watch",
                source: e.into(),
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            inotify,
            watch,
        })
    }

    /// Reads the current value of the `populated` field.
    ///
    /// # Errors
    ///
    /// Returns [`RunexclError::Io`] if the file cannot be read and
    /// [`RunexclError::Protocol`] if the field is missing or malformed.
    pub fn populated(&mut self) -> Result<bool> {
        let io_error = |e| RunexclError::Io {
            path: self.path.clone(),
            source: e,
        };
        let mut content = String::new();
        let _ = self.file.seek(SeekFrom::Start(0)).map_err(io_error)?;
        let _ = self.file.read_to_string(&mut content).map_err(io_error)?;
        parse_populated(&content).ok_or_else(|| RunexclError::Protocol {
            path: self.path.clone(),
            message: format!("no populated field in {:?}", content.trim_end()),
        })
    }

    /// Blocks until the watched file is modified. Interrupted reads are
    /// retried.
    ///
    /// # Errors
    ///
    /// Returns [`RunexclError::Os`] if reading the inotify descriptor fails.
    pub fn wait_for_change(&self) -> Result<()> {
        loop {
            match self.inotify.read_events() {
                Ok(events) => {
                    if events.iter().any(|event| event.wd == self.watch) {
                        return Ok(());
                    }
                }
                Err(Errno::EINTR) => {}
                Err(errno) => {
                    return Err(RunexclError::Os {
                        call: "read(inotify)",
                        source: errno.into(),
                    });
                }
            }
        }
    }

    /// Blocks until the cgroup holds no process, including descendants of
    /// processes that already exited. There is no timeout.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`Self::populated`] or
    /// [`Self::wait_for_change`].
    pub fn wait_until_empty(&mut self) -> Result<()> {
        while self.populated()? {
            tracing::trace!(path = %self.path.display(), "cgroup still populated");
            self.wait_for_change()?;
        }
        tracing::debug!(path = %self.path.display(), "cgroup drained");
        Ok(())
    }
}

/// Extracts `populated <0|1>` from the content of `cgroup.events`.
fn parse_populated(content: &str) -> Option<bool> {
    content.lines().find_map(|line| {
        let (key, value) = line.split_once(' ')?;
        if key != "populated" {
            return None;
        }
        match value.trim() {
            "0" => Some(false),
            "1" => Some(true),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::*;

    /// Rewrites the file in place without truncating it first, the way the
    /// kernel updates `cgroup.events`.
    fn overwrite(path: &Path, content: &str) {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .expect("open for write");
        file.write_all(content.as_bytes()).expect("write");
    }

    #[test]
    fn parses_populated_field() {
        assert_eq!(parse_populated("populated 1\nfrozen 0\n"), Some(true));
        assert_eq!(parse_populated("populated 0\nfrozen 0\n"), Some(false));
        assert_eq!(parse_populated("frozen 0\npopulated 0\n"), Some(false));
    }

    #[test]
    fn missing_or_malformed_field_is_none() {
        assert_eq!(parse_populated(""), None);
        assert_eq!(parse_populated("frozen 0\n"), None);
        assert_eq!(parse_populated("populated yes\n"), None);
    }

    #[test]
    fn populated_rereads_from_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cgroup.events");
        std::fs::write(&path, "populated 1\nfrozen 0\n").expect("write");

        let mut watcher = EventsWatcher::open(&path).expect("open");
        assert!(watcher.populated().expect("populated"));
        overwrite(&path, "populated 0\nfrozen 0\n");
        assert!(!watcher.populated().expect("populated"));
    }

    #[test]
    fn protocol_error_names_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cgroup.events");
        std::fs::write(&path, "frozen 0\n").expect("write");

        let mut watcher = EventsWatcher::open(&path).expect("open");
        let err = watcher.populated().expect_err("missing field");
        assert!(matches!(err, RunexclError::Protocol { path: ref p, .. } if p == &path));
    }

    #[test]
    fn wait_until_empty_wakes_on_modification() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cgroup.events");
        std::fs::write(&path, "populated 1\nfrozen 0\n").expect("write");
        let mut watcher = EventsWatcher::open(&path).expect("open");

        let writer = {
            let path = path.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                overwrite(&path, "populated 1\nfrozen 1\n");
                std::thread::sleep(Duration::from_millis(50));
                overwrite(&path, "populated 0\nfrozen 0\n");
            })
        };

        watcher.wait_until_empty().expect("drained");
        writer.join().expect("join");
        assert!(!watcher.populated().expect("populated"));
    }
}
