// src/event.rs

//! Engine events and listener fanout.
//!
//! Two event families exist: repository mutations and feature lifecycle
//! changes. Both carry a `replayed` flag, set when the event is delivered
//! to a newly registered listener catching up on current state rather than
//! reporting a fresh transition. Events are delivered after the
//! corresponding state commit, in listener registration order.

use crate::model::FeatureId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureEventKind {
    Installed,
    Uninstalled,
}

#[derive(Debug, Clone)]
pub struct FeatureEvent {
    pub feature: FeatureId,
    pub kind: FeatureEventKind,
    pub replayed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryEventKind {
    Added,
    Removed,
}

#[derive(Debug, Clone)]
pub struct RepositoryEvent {
    pub uri: String,
    pub kind: RepositoryEventKind,
    pub replayed: bool,
}

/// Tagged union over both event families.
#[derive(Debug, Clone)]
pub enum Event {
    Feature(FeatureEvent),
    Repository(RepositoryEvent),
}

impl Event {
    pub fn feature(feature: FeatureId, kind: FeatureEventKind, replayed: bool) -> Self {
        Event::Feature(FeatureEvent {
            feature,
            kind,
            replayed,
        })
    }

    pub fn repository(uri: impl Into<String>, kind: RepositoryEventKind, replayed: bool) -> Self {
        Event::Repository(RepositoryEvent {
            uri: uri.into(),
            kind,
            replayed,
        })
    }
}

/// Sink for engine events: user-registered listeners and the internal
/// event bus both implement this.
pub trait Listener: Send + Sync {
    fn on_event(&self, event: &Event);
}
