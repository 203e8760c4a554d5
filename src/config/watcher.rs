//! Hot reload of the configuration file.
//!
//! Editors emit several events per save; a reload is only sent when the
//! file text differs from the last text that was loaded.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::parse_config;
use crate::config::schema::ServerConfig;

/// Watches one config file; reloads stop when this is dropped.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching `path`. Each validated change arrives on the receiver.
    pub fn start(path: &Path) -> Result<(Self, mpsc::UnboundedReceiver<ServerConfig>), notify::Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let last = Arc::new(Mutex::new(std::fs::read_to_string(path).ok()));
        let file = path.to_path_buf();

        let mut watcher = RecommendedWatcher::new(
            move |event: notify::Result<Event>| match event {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    if let Some(config) = reload(&file, &last) {
                        let _ = tx.send(config);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "Watching config file");
        Ok((
            Self {
                path: path.to_path_buf(),
                _watcher: watcher,
            },
            rx,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn reload(path: &Path, last: &Mutex<Option<String>>) -> Option<ServerConfig> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Config file unreadable");
            return None;
        }
    };

    let mut last = last.lock().expect("config text lock poisoned");
    if last.as_deref() == Some(text.as_str()) {
        return None;
    }

    match parse_config(&text) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "Config reloaded");
            *last = Some(text);
            Some(config)
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Config reload rejected, keeping current");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, text: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("switchyard-{}-{}.toml", name, uuid::Uuid::new_v4()));
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_reload_skips_unchanged_text() {
        let path = temp_file("same", "name = \"a\"\n");
        let last = Mutex::new(Some("name = \"a\"\n".to_string()));
        assert!(reload(&path, &last).is_none());

        std::fs::write(&path, "name = \"b\"\n").unwrap();
        assert_eq!(reload(&path, &last).unwrap().name, "b");
        assert!(reload(&path, &last).is_none());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_reload_rejects_invalid_config() {
        let path = temp_file("invalid", "name = \"\"\n");
        let last = Mutex::new(None);
        assert!(reload(&path, &last).is_none());
        assert!(last.lock().unwrap().is_none());
        std::fs::remove_file(&path).unwrap();
    }
}
