//! Config file watcher service
//!
//! Monitors the configuration file for changes and emits events when it
//! is modified, so safety limits can be tightened without a restart.

use crate::events::{ConfigChangedEvent, EngineEvent};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

/// Default debounce duration for file change events
const DEFAULT_DEBOUNCE_DURATION: Duration = Duration::from_millis(500);

/// Watches the config file and emits an event when it changes
pub struct ConfigWatcher {
    config_path: PathBuf,
    event_tx: broadcast::Sender<EngineEvent>,
    /// Debounce duration to avoid rapid re-fires
    debounce_duration: Duration,
}

impl ConfigWatcher {
    pub fn new(config_path: impl Into<PathBuf>, event_tx: broadcast::Sender<EngineEvent>) -> Self {
        Self {
            config_path: config_path.into(),
            event_tx,
            debounce_duration: DEFAULT_DEBOUNCE_DURATION,
        }
    }

    /// Set custom debounce duration
    pub fn with_debounce(mut self, duration: Duration) -> Self {
        self.debounce_duration = duration;
        self
    }

    /// Run the config watcher until dropped or the watch backend fails
    pub async fn run(&self) -> Result<(), ConfigWatcherError> {
        let (tx, mut rx) = mpsc::channel::<notify::Result<Event>>(100);

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.blocking_send(res);
            },
            Config::default(),
        )
        .map_err(|e| ConfigWatcherError::WatcherInit(e.to_string()))?;

        if self.config_path.exists() {
            watcher
                .watch(&self.config_path, RecursiveMode::NonRecursive)
                .map_err(|e| ConfigWatcherError::WatchPath {
                    path: self.config_path.clone(),
                    error: e.to_string(),
                })?;
            info!("Watching config: {:?}", self.config_path);
        } else {
            warn!(
                "Config file does not exist, will not watch: {:?}",
                self.config_path
            );
        }

        // Track last event time per path for debouncing
        let last_events: Arc<RwLock<HashMap<PathBuf, Instant>>> =
            Arc::new(RwLock::new(HashMap::new()));

        while let Some(res) = rx.recv().await {
            match res {
                Ok(event) => {
                    self.handle_event(event, &last_events).await;
                }
                Err(e) => {
                    error!("Watch error: {:?}", e);
                }
            }
        }

        Ok(())
    }

    async fn handle_event(
        &self,
        event: Event,
        last_events: &Arc<RwLock<HashMap<PathBuf, Instant>>>,
    ) {
        if !matches!(
            event.kind,
            EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
        ) {
            return;
        }

        for path in event.paths {
            if path.extension().is_none_or(|ext| ext != "toml") {
                continue;
            }

            let now = Instant::now();
            {
                let last = last_events.read().await;
                if let Some(&last_time) = last.get(&path) {
                    if now.duration_since(last_time) < self.debounce_duration {
                        debug!("Debouncing event for {:?}", path);
                        continue;
                    }
                }
            }

            {
                let mut last = last_events.write().await;
                last.insert(path.clone(), now);
            }

            debug!("Config changed: {:?}", path);

            let event = ConfigChangedEvent::new(path);
            if let Err(e) = self.event_tx.send(EngineEvent::ConfigChanged(event)) {
                warn!("Failed to send config changed event: {:?}", e);
            }
        }
    }
}

/// Errors that can occur in the config watcher
#[derive(Debug, thiserror::Error)]
pub enum ConfigWatcherError {
    #[error("Failed to initialize watcher: {0}")]
    WatcherInit(String),

    #[error("Failed to watch path {path:?}: {error}")]
    WatchPath { path: PathBuf, error: String },
}
