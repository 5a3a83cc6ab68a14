//! Loadable lifecycle events.

use crate::loadable::{LoadableId, LoadableKind};

/// Events emitted by the loadable coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A load completed.
    Loaded {
        id: LoadableId,
        kind: LoadableKind,
        key: String,
    },

    /// A load failed.
    LoadFailed {
        id: LoadableId,
        kind: LoadableKind,
        key: String,
        error: String,
    },

    /// A loadable was unloaded and left its cache.
    Unloaded { kind: LoadableKind, key: String },
}

impl EngineEvent {
    pub fn kind(&self) -> LoadableKind {
        match self {
            EngineEvent::Loaded { kind, .. }
            | EngineEvent::LoadFailed { kind, .. }
            | EngineEvent::Unloaded { kind, .. } => *kind,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            EngineEvent::Loaded { key, .. }
            | EngineEvent::LoadFailed { key, .. }
            | EngineEvent::Unloaded { key, .. } => key,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, EngineEvent::Loaded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, EngineEvent::LoadFailed { .. })
    }

    pub fn is_unloaded(&self) -> bool {
        matches!(self, EngineEvent::Unloaded { .. })
    }
}

/// A buffer of events that the host drains once per frame.
#[derive(Debug, Default)]
pub struct EventBuffer {
    events: Vec<EngineEvent>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn push(&mut self, event: EngineEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> impl Iterator<Item = EngineEvent> + '_ {
        self.events.drain(..)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EngineEvent> {
        self.events.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}
