use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tracing::debug;

use weft_core::types::ChatMessage;

/// Bounded recent conversation history for one memory scope.
///
/// Oldest turns are evicted first once `max_messages` is exceeded.
#[derive(Debug)]
pub struct MemoryWindow {
    turns: VecDeque<ChatMessage>,
    max_messages: usize,
}

impl MemoryWindow {
    pub fn new(max_messages: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_messages,
        }
    }

    /// Append a turn, evicting the oldest turns beyond the bound.
    pub fn append(&mut self, turn: ChatMessage) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_messages {
            self.turns.pop_front();
        }
    }

    /// Current window contents, oldest first.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Keyed collection of memory windows, scoped by session + node id.
///
/// Windows are only mutated by their owning node's handler; the planner's
/// dependency ordering keeps same-scope nodes from running concurrently, and
/// the internal mutex covers the map itself.
pub struct MemoryManager {
    windows: Mutex<HashMap<String, MemoryWindow>>,
    default_max_messages: usize,
}

impl MemoryManager {
    pub fn new(default_max_messages: usize) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            default_max_messages,
        }
    }

    /// Append a turn to a scope, creating the window on first use.
    pub fn append(&self, scope: &str, turn: ChatMessage) {
        self.append_bounded(scope, turn, self.default_max_messages);
    }

    /// Append with an explicit bound (used by chat nodes that configure
    /// their own window size).
    pub fn append_bounded(&self, scope: &str, turn: ChatMessage, max_messages: usize) {
        let mut windows = self.windows.lock().expect("memory window lock poisoned");
        let window = windows
            .entry(scope.to_string())
            .or_insert_with(|| MemoryWindow::new(max_messages));
        window.append(turn);
    }

    /// Snapshot the current window for a scope, oldest first.
    pub fn snapshot(&self, scope: &str) -> Vec<ChatMessage> {
        let windows = self.windows.lock().expect("memory window lock poisoned");
        windows.get(scope).map(|w| w.snapshot()).unwrap_or_default()
    }

    /// Seed a scope from persisted history (hydration before a run).
    pub fn hydrate(&self, scope: &str, turns: Vec<ChatMessage>, max_messages: usize) {
        let mut windows = self.windows.lock().expect("memory window lock poisoned");
        let window = windows
            .entry(scope.to_string())
            .or_insert_with(|| MemoryWindow::new(max_messages));
        if window.is_empty() {
            debug!(scope, count = turns.len(), "Hydrating memory window");
            for turn in turns {
                window.append(turn);
            }
        }
    }

    /// Whether a scope has any turns.
    pub fn contains(&self, scope: &str) -> bool {
        let windows = self.windows.lock().expect("memory window lock poisoned");
        windows.get(scope).map(|w| !w.is_empty()).unwrap_or(false)
    }
}
