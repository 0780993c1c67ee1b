// ============================================================================
// STATUS EVENTS — the engine's outward signal channel
// ============================================================================
//
// Replaces the status-light-singleton pattern: instead of mutating a shared
// indicator, the engine pushes typed events into a queue that any front-end
// (a UI, a log, a test) drains on its own schedule. Single-threaded and
// cooperative like the rest of the engine.

use std::collections::VecDeque;

use crate::canvas::LayerId;

/// Which capture tool an event refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolKind {
    Lasso,
    Pen,
}

impl ToolKind {
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Lasso => "lasso",
            ToolKind::Pen => "pen",
        }
    }
}

/// Everything the engine reports to its host.
#[derive(Clone, Debug, PartialEq)]
pub enum StatusEvent {
    ToolActivated { tool: ToolKind, layer: LayerId },
    ToolDeactivated { tool: ToolKind },
    LayerLocked(LayerId),
    LayerUnlocked(LayerId),
    /// A layer's live mask changed (new selection folded in, cleared,
    /// or restored).
    MaskChanged(LayerId),
    /// A mask was permanently baked into a layer's alpha channel.
    MaskMerged(LayerId),
    /// The exported composite is stale; downstream consumers should
    /// re-pull.
    OutputChanged,
    /// Persistence rejected a save. In-memory state is unchanged.
    SaveFailed(String),
}

/// FIFO of pending status events.
#[derive(Default)]
pub struct EventQueue {
    queue: VecDeque<StatusEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: StatusEvent) {
        crate::log_info!("event: {:?}", event);
        self.queue.push_back(event);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Take every pending event, oldest first.
    pub fn drain(&mut self) -> Vec<StatusEvent> {
        self.queue.drain(..).collect()
    }

    /// True if any pending event matches; does not consume.
    pub fn contains(&self, event: &StatusEvent) -> bool {
        self.queue.iter().any(|e| e == event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_events_in_emit_order() {
        let mut queue = EventQueue::new();
        queue.emit(StatusEvent::OutputChanged);
        queue.emit(StatusEvent::SaveFailed("offline".into()));
        let events = queue.drain();
        assert_eq!(
            events,
            vec![
                StatusEvent::OutputChanged,
                StatusEvent::SaveFailed("offline".into())
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn contains_does_not_consume() {
        let mut queue = EventQueue::new();
        queue.emit(StatusEvent::OutputChanged);
        assert!(queue.contains(&StatusEvent::OutputChanged));
        assert_eq!(queue.len(), 1);
    }
}
