//! Filesystem watch-point manager.
//!
//! Registers watch points on behalf of the controller and surfaces change
//! notifications to the dispatch loop, which forwards them upstream. Events
//! arrive on the `notify` backend's own thread and are buffered through a
//! channel the dispatcher drains once per iteration.

use std::path::Path;
use std::sync::mpsc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use crate::Result;

/// Manages the watched path set and buffers pending notifications.
pub struct WatchManager {
    watcher: RecommendedWatcher,
    paths: Vec<String>,
    events: mpsc::Receiver<String>,
}

impl WatchManager {
    /// Create the manager with an empty watch set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Watch` if the backend watcher cannot be created.
    pub fn new() -> Result<Self> {
        let (tx, events) = mpsc::channel::<String>();

        let watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if let Some(rendered) = render_event(&event) {
                        // Send only fails once the manager itself is gone.
                        if tx.send(rendered).is_err() {
                            warn!("watch event buffer closed");
                        }
                    }
                }
                Err(err) => {
                    warn!(%err, "file watcher error");
                }
            },
        )?;

        Ok(Self {
            watcher,
            paths: Vec::new(),
            events,
        })
    }

    /// Start watching one path. Already-watched paths are ignored.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Watch` if the path cannot be registered.
    pub fn add_watcher(&mut self, path: &str) -> Result<()> {
        if self.paths.iter().any(|p| p == path) {
            return Ok(());
        }
        self.watcher
            .watch(Path::new(path), RecursiveMode::NonRecursive)?;
        self.paths.push(path.to_owned());
        info!(path, "watch point added");
        Ok(())
    }

    /// Stop watching one path. Unknown paths are ignored.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Watch` if deregistration fails.
    pub fn erase_watcher(&mut self, path: &str) -> Result<()> {
        if !self.paths.iter().any(|p| p == path) {
            return Ok(());
        }
        self.watcher.unwatch(Path::new(path))?;
        self.paths.retain(|p| p != path);
        info!(path, "watch point removed");
        Ok(())
    }

    /// The currently watched paths, in registration order.
    #[must_use]
    pub fn list(&self) -> &[String] {
        &self.paths
    }

    /// Drain every notification buffered since the previous call.
    pub fn drain_events(&mut self) -> Vec<String> {
        self.events.try_iter().collect()
    }
}

/// Render a change notification as the single-line text forwarded upstream.
fn render_event(event: &Event) -> Option<String> {
    let verb = match event.kind {
        EventKind::Create(_) => "create",
        EventKind::Modify(_) => "modify",
        EventKind::Remove(_) => "remove",
        _ => return None,
    };
    let path = event.paths.first()?;
    Some(format!("{verb} {}", path.display()))
}
