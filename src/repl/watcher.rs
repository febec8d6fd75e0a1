use crossbeam_channel::Sender;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};

/// Watches pattern files and forwards notify events to the REPL loop
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    watched: Vec<PathBuf>,
}

impl FileWatcher {
    pub fn new(tx: Sender<notify::Result<Event>>) -> notify::Result<Self> {
        let watcher = notify::recommended_watcher(move |res| {
            // receiver gone means the REPL is shutting down
            let _ = tx.send(res);
        })?;

        Ok(Self {
            watcher,
            watched: Vec::new(),
        })
    }

    pub fn watch<P: AsRef<Path>>(&mut self, path: P) -> notify::Result<()> {
        let path = path.as_ref();
        self.watcher.watch(path, RecursiveMode::NonRecursive)?;
        if !self.watched.iter().any(|p| p == path) {
            self.watched.push(path.to_path_buf());
        }
        Ok(())
    }

    pub fn unwatch<P: AsRef<Path>>(&mut self, path: P) -> notify::Result<()> {
        let path = path.as_ref();
        self.watched.retain(|p| p != path);
        self.watcher.unwatch(path)
    }

    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }
}

/// Paths whose contents changed, or nothing for events that do not touch
/// file contents
pub fn changed_paths(event: Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Modify(_) | EventKind::Create(_) => event.paths,
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};

    #[test]
    fn test_only_content_changes_count() {
        let path = PathBuf::from("live.fct");
        let modify = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(path.clone());
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone());
        let access = Event::new(EventKind::Access(AccessKind::Any)).add_path(path.clone());

        assert_eq!(changed_paths(modify), vec![path.clone()]);
        assert_eq!(changed_paths(create), vec![path]);
        assert!(changed_paths(access).is_empty());
    }

    #[test]
    fn test_watch_list_tracks_paths() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let dir = std::env::temp_dir().join(format!("facet-watch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("live.fct");
        std::fs::write(&file, "kick vol [1 0]").unwrap();

        let mut watcher = FileWatcher::new(tx).unwrap();
        watcher.watch(&file).unwrap();
        watcher.watch(&file).unwrap();
        assert_eq!(watcher.watched(), &[file.clone()]);
        watcher.unwatch(&file).unwrap();
        assert!(watcher.watched().is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
