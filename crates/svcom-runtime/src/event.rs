/// Index of an event within a service interface.
pub type EventId = u16;

/// How a subscriber wants to receive an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventMode {
    /// Only updates published after subscribing.
    #[default]
    Update,
    /// The last known value right away, then updates.
    UpdateAndInitialValue,
}

/// Subscription state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventState {
    #[default]
    Unsubscribed,
    Subscribed,
}

/// A client's view of one event slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Event {
    pub id: EventId,
    pub mode: EventMode,
    pub state: EventState,
}

impl Event {
    pub fn new(id: EventId, mode: EventMode, state: EventState) -> Self {
        Self { id, mode, state }
    }
}
