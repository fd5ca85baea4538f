use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    config::{write_atomic, FeedConfig},
    watch::{NotificationPayload, Publisher},
};

/// One published change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedItem {
    pub title: String,
    /// HTML description
    pub description: String,
    pub link: String,
    pub published: DateTime<Utc>,
}

/// Newest-first list of published changes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Feed {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub items: Vec<FeedItem>,
}

impl Feed {
    /// Load feed from file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!("Loading feed from {:?}", path);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read feed from {:?}", path))?;

        let feed: Feed = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse feed from {:?}", path))?;

        Ok(feed)
    }

    /// Save feed to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize feed")?;

        write_atomic(path, &content)
            .with_context(|| format!("Failed to write feed to {:?}", path))?;

        Ok(())
    }

    /// Add an item at the front, dropping the oldest beyond `max_items`
    pub fn push(&mut self, item: FeedItem, max_items: usize) {
        self.items.insert(0, item);
        self.items.truncate(max_items.max(1));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FeedItem {
    pub fn from_payload(payload: NotificationPayload, published: DateTime<Utc>) -> Self {
        Self {
            title: payload.title,
            description: payload.body,
            link: payload.link,
            published,
        }
    }
}

/// Publisher appending to a feed file
#[derive(Debug)]
pub struct FeedWriter {
    path: PathBuf,
    title: String,
    max_items: usize,
    /// Serializes read-modify-write cycles of the file
    lock: Mutex<()>,
}

impl FeedWriter {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            path: config.path.clone(),
            title: config.title.clone(),
            max_items: config.max_items,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Publisher for FeedWriter {
    fn publish(&self, payload: NotificationPayload) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut feed = Feed::load(&self.path)?;
        feed.title.clone_from(&self.title);
        feed.push(FeedItem::from_payload(payload, Utc::now()), self.max_items);
        feed.save(&self.path)?;

        tracing::debug!("feed {:?} now holds {} items", self.path, feed.len());
        Ok(())
    }
}
