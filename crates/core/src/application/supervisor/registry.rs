// Handle registry (the Supervisor's mutable state, always behind one lock)

use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::{DependencyGraph, ServiceHandle, ServiceName, ServiceState};
use crate::port::ManagedProcess;

/// A launched service: its handle plus the process it owns
pub(crate) struct Entry {
    pub handle: ServiceHandle,
    pub process: Option<Box<dyn ManagedProcess>>,
}

/// Handles keyed by service name
///
/// An entry exists iff a launch was attempted for that service.
#[derive(Default)]
pub(crate) struct Registry {
    pub entries: HashMap<ServiceName, Entry>,
    /// Service names in the order their launch was attempted
    pub launch_order: Vec<ServiceName>,
    pub graph: DependencyGraph,
}

impl Registry {
    pub fn insert(&mut self, handle: ServiceHandle, process: Option<Box<dyn ManagedProcess>>) {
        let name = handle.name.clone();
        self.launch_order.push(name.clone());
        self.entries.insert(name, Entry { handle, process });
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Entry> {
        self.entries.get_mut(name)
    }

    pub fn state(&self, name: &str) -> Option<ServiceState> {
        self.entries.get(name).map(|e| e.handle.state)
    }

    /// Snapshot of all handles in launch order
    pub fn handles(&self) -> Vec<ServiceHandle> {
        self.launch_order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|e| e.handle.clone())
            .collect()
    }

    /// Launched services that are not terminal, most recently launched first
    pub fn live_in_reverse_launch_order(&self) -> Vec<ServiceName> {
        self.launch_order
            .iter()
            .rev()
            .filter(|name| {
                self.state(name)
                    .map(|state| !state.is_terminal())
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Nearest CRASHED service among `name`'s transitive predecessors
    pub fn crashed_upstream(&self, name: &str) -> Option<ServiceName> {
        let mut queue: VecDeque<&str> = self
            .graph
            .predecessors(name)
            .iter()
            .map(String::as_str)
            .collect();
        let mut seen = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            if self.state(current) == Some(ServiceState::Crashed) {
                return Some(current.to_string());
            }
            queue.extend(self.graph.predecessors(current).iter().map(String::as_str));
        }
        None
    }

    /// Names with the given state, in launch order
    pub fn names_in_state(&self, state: ServiceState) -> Vec<ServiceName> {
        self.launch_order
            .iter()
            .filter(|name| self.state(name) == Some(state))
            .cloned()
            .collect()
    }
}
