//! Latest-snapshot caches fed by the joint-state and marker feeds.
//!
//! Each cache wraps a [`tokio::sync::watch`] sender: updates swap the stored snapshot in one
//! step and readers only ever see a complete snapshot. Clones share the same slot.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::watch;

use crate::msgs::{JointState, MarkerArray};
use crate::DispatchError;

/// Names of the markers visible in the latest perception update.
pub type MarkerSet = BTreeSet<String>;

#[derive(Debug, Clone)]
pub struct JointStateCache {
    slot: Arc<watch::Sender<Arc<JointState>>>,
}

impl Default for JointStateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl JointStateCache {
    /// Starts with an empty, zero-joint snapshot.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(JointState::default()));
        Self { slot: Arc::new(tx) }
    }

    /// Replaces the stored snapshot wholesale. No validation is performed.
    pub fn update(&self, snapshot: JointState) {
        self.slot.send_replace(Arc::new(snapshot));
    }

    pub fn get(&self) -> Arc<JointState> {
        self.slot.borrow().clone()
    }

    pub fn lookup(&self, joint: &str) -> Result<f64, DispatchError> {
        self.slot.borrow().position(joint)
    }

    /// Receiver that observes every future snapshot swap.
    pub fn subscribe(&self) -> watch::Receiver<Arc<JointState>> {
        self.slot.subscribe()
    }
}

#[derive(Debug, Clone)]
pub struct MarkerCache {
    slot: Arc<watch::Sender<Arc<MarkerSet>>>,
}

impl Default for MarkerCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkerCache {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(MarkerSet::new()));
        Self { slot: Arc::new(tx) }
    }

    /// Replaces the visible set. Markers missing from `names` are no longer visible.
    pub fn update<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: MarkerSet = names.into_iter().map(Into::into).collect();
        self.slot.send_replace(Arc::new(set));
    }

    pub fn update_from_array(&self, msg: MarkerArray) {
        self.update(msg.markers.into_iter().map(|m| m.name));
    }

    pub fn get(&self) -> Arc<MarkerSet> {
        self.slot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<MarkerSet>> {
        self.slot.subscribe()
    }
}
