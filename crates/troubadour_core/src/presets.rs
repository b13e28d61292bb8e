//! Preset Store and Directory Watcher
//!
//! Presets are mixer documents stored as single files in one directory;
//! the preset name is the file stem. The watcher monitors that directory
//! and publishes a snapshot-invalidated event when anything in it
//! changes, so the UI can refresh its preset list (and reload, if the
//! active preset was edited externally).

use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::document::MixerDocument;
use crate::error::{MixerError, MixerResult};
use crate::ids::validate_id_str;
use crate::message::Event;

/// Extension of preset files written by this store.
pub const PRESET_EXT: &str = "toml";

/// Burst window: file managers and editors produce several events per
/// save; one notification per burst is enough.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Filesystem-backed preset collection.
pub struct PresetStore {
    dir: PathBuf,
}

impl PresetStore {
    /// Open (creating if needed) the preset directory.
    pub fn open(dir: PathBuf) -> MixerResult<Self> {
        fs::create_dir_all(&dir)
            .map_err(|e| MixerError::device(format!("creating {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Preset names: the stems of the directory's immediate children.
    pub fn list(&self) -> MixerResult<Vec<String>> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| MixerError::device(format!("reading {}: {e}", self.dir.display())))?;

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| {
                let path = entry.path();
                let ext_ok = path
                    .extension()
                    .map(|e| e.eq_ignore_ascii_case(PRESET_EXT))
                    .unwrap_or(false);
                if !ext_ok {
                    return None;
                }
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .collect();

        names.sort();
        Ok(names)
    }

    pub fn load(&self, name: &str) -> MixerResult<MixerDocument> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(MixerError::not_found(format!("preset '{name}'")));
        }
        let text = fs::read_to_string(&path)
            .map_err(|e| MixerError::device(format!("reading preset '{name}': {e}")))?;
        MixerDocument::parse(&text)
    }

    /// Write or overwrite a preset.
    pub fn save(&self, name: &str, document: &MixerDocument) -> MixerResult<()> {
        let path = self.path_for(name)?;
        fs::write(&path, document.to_toml()?)
            .map_err(|e| MixerError::device(format!("writing preset '{name}': {e}")))?;
        info!(preset = name, "preset saved");
        Ok(())
    }

    pub fn delete(&self, name: &str) -> MixerResult<()> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(MixerError::not_found(format!("preset '{name}'")));
        }
        fs::remove_file(&path)
            .map_err(|e| MixerError::device(format!("deleting preset '{name}': {e}")))?;
        info!(preset = name, "preset deleted");
        Ok(())
    }

    /// Preset names share the id character set, which also rules out
    /// path separators and traversal.
    fn path_for(&self, name: &str) -> MixerResult<PathBuf> {
        validate_id_str("preset name", name)?;
        Ok(self.dir.join(name).with_extension(PRESET_EXT))
    }
}

/// Watches the preset directory in the background.
pub struct PresetWatcher {
    // Held for its Drop; dropping stops the OS watch
    _watcher: RecommendedWatcher,
    stop_sender: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl PresetWatcher {
    /// Watch `dir`, publishing [`Event::SnapshotInvalidated`] on change.
    pub fn spawn(dir: &Path, events: Sender<Event>) -> MixerResult<Self> {
        let (raw_sender, raw_receiver) = unbounded::<notify::Event>();

        let mut watcher = notify::recommended_watcher(
            move |result: Result<notify::Event, notify::Error>| match result {
                Ok(event) => {
                    let _ = raw_sender.send(event);
                }
                Err(err) => warn!("preset watcher error: {err}"),
            },
        )
        .map_err(|e| MixerError::device(format!("creating preset watcher: {e}")))?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| MixerError::device(format!("watching {}: {e}", dir.display())))?;

        info!(dir = %dir.display(), "watching preset directory");

        let (stop_sender, stop_receiver) = unbounded::<()>();
        let thread = thread::Builder::new()
            .name("troubadour-presets".into())
            .spawn(move || debounce_loop(raw_receiver, stop_receiver, events))
            .map_err(|e| MixerError::Fatal(format!("spawning preset watcher thread: {e}")))?;

        Ok(Self {
            _watcher: watcher,
            stop_sender,
            thread: Some(thread),
        })
    }
}

impl Drop for PresetWatcher {
    fn drop(&mut self) {
        let _ = self.stop_sender.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn debounce_loop(
    raw: Receiver<notify::Event>,
    stop: Receiver<()>,
    events: Sender<Event>,
) {
    loop {
        crossbeam_channel::select! {
            recv(stop) -> _ => break,
            recv(raw) -> event => {
                let Ok(event) = event else { break };
                if !relevant(&event.kind) {
                    continue;
                }
                debug!(?event.kind, "preset directory changed");

                // Swallow the rest of the burst
                while raw.recv_timeout(DEBOUNCE).is_ok() {}

                if events.send(Event::SnapshotInvalidated).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store() -> (tempfile::TempDir, PresetStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PresetStore::open(dir.path().join("presets")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_empty_store_lists_nothing() {
        let (_dir, store) = store();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_save_list_load_delete() {
        let (_dir, store) = store();
        let doc = MixerDocument::default();

        store.save("live-set", &doc).unwrap();
        store.save("rehearsal", &doc).unwrap();
        assert_eq!(store.list().unwrap(), vec!["live-set", "rehearsal"]);

        let loaded = store.load("live-set").unwrap();
        assert_eq!(loaded, doc);

        store.delete("live-set").unwrap();
        assert_eq!(store.list().unwrap(), vec!["rehearsal"]);
    }

    #[test]
    fn test_missing_preset_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(store.load("ghost"), Err(MixerError::NotFound(_))));
        assert!(matches!(store.delete("ghost"), Err(MixerError::NotFound(_))));
    }

    #[test]
    fn test_traversal_names_rejected() {
        let (_dir, store) = store();
        let doc = MixerDocument::default();
        assert!(store.save("../escape", &doc).is_err());
        assert!(store.save("a/b", &doc).is_err());
        assert!(store.save("", &doc).is_err());
    }

    #[test]
    fn test_list_ignores_foreign_files() {
        let (_dir, store) = store();
        store.save("real", &MixerDocument::default()).unwrap();
        fs::write(store.dir().join("notes.txt"), "not a preset").unwrap();
        fs::create_dir(store.dir().join("subdir")).unwrap();

        assert_eq!(store.list().unwrap(), vec!["real"]);
    }

    #[test]
    fn test_save_overwrites() {
        let (_dir, store) = store();
        let mut doc = MixerDocument::default();
        store.save("p", &doc).unwrap();

        doc.app.frames_per_block = 1024;
        store.save("p", &doc).unwrap();

        assert_eq!(store.load("p").unwrap().app.frames_per_block, 1024);
    }

    #[test]
    fn test_watcher_reports_changes() {
        let (_dir, store) = store();
        let (tx, rx) = unbounded();
        let watcher = PresetWatcher::spawn(store.dir(), tx).unwrap();

        store.save("new-preset", &MixerDocument::default()).unwrap();

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, Event::SnapshotInvalidated));
        drop(watcher);
    }
}
