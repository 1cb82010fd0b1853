use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Created,
    Modified,
}

impl Trigger {
    pub fn from_kind(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Trigger::Created),
            EventKind::Modify(_) => Some(Trigger::Modified),
            _ => None,
        }
    }
}

/// A non-recursive watch on one folder. Dropping it stops the watch.
pub struct FolderWatch {
    folder: PathBuf,
    _watcher: RecommendedWatcher,
}

impl FolderWatch {
    /// Calls `on_file` for every file event under `folder` whose trigger is in `triggers`.
    pub fn start<F>(folder: &Path, triggers: &'static [Trigger], on_file: F) -> notify::Result<Self>
    where
        F: Fn(Trigger, PathBuf) + Send + 'static,
    {
        let label = folder.display().to_string();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let Some(trigger) = Trigger::from_kind(&event.kind) else {
                    return;
                };
                if !triggers.contains(&trigger) {
                    return;
                }
                for path in event.paths {
                    if !path.is_dir() {
                        on_file(trigger, path);
                    }
                }
            }
            Err(e) => tracing::warn!("Watch error on {}: {}", label, e),
        })?;

        watcher.watch(folder, RecursiveMode::NonRecursive)?;
        tracing::info!("Watching {}", folder.display());

        Ok(Self {
            folder: folder.to_path_buf(),
            _watcher: watcher,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// `.zip` files, optionally restricted to names starting with `prefix`.
pub fn zip_candidate(path: &Path, prefix: &str) -> bool {
    if !has_extension(path, "zip") {
        return false;
    }
    prefix.is_empty()
        || path
            .file_name()
            .map(|name| name.to_string_lossy().starts_with(prefix))
            .unwrap_or(false)
}

pub fn apk_candidate(path: &Path) -> bool {
    has_extension(path, "apk")
}

/// Files already sitting in `folder` that pass `filter`, sorted by name.
pub fn existing_files(folder: &Path, filter: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot list {}: {}", folder.display(), e);
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && filter(path))
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_zip_candidate_prefix() {
        assert!(zip_candidate(Path::new("/in/PT-001.zip"), "PT"));
        assert!(zip_candidate(Path::new("/in/PT-001.ZIP"), ""));
        assert!(!zip_candidate(Path::new("/in/XX-001.zip"), "PT"));
        assert!(!zip_candidate(Path::new("/in/PT-001.zip.part"), "PT"));
    }

    #[test]
    fn test_apk_candidate() {
        assert!(apk_candidate(Path::new("C:/apk/store.apk")));
        assert!(!apk_candidate(Path::new("C:/apk/store.apk.tmp")));
    }

    #[test]
    fn test_trigger_from_kind() {
        use notify::event::{CreateKind, ModifyKind, RemoveKind};
        assert_eq!(
            Trigger::from_kind(&EventKind::Create(CreateKind::File)),
            Some(Trigger::Created)
        );
        assert_eq!(
            Trigger::from_kind(&EventKind::Modify(ModifyKind::Any)),
            Some(Trigger::Modified)
        );
        assert_eq!(Trigger::from_kind(&EventKind::Remove(RemoveKind::File)), None);
    }

    #[test]
    fn test_existing_files_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.apk"), b"").unwrap();
        fs::write(dir.path().join("a.apk"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("dir.apk")).unwrap();

        let files = existing_files(dir.path(), apk_candidate);
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.apk", "b.apk"]);
    }
}
