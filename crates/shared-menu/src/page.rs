use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

/// Document loading phase, as the host reports it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
    Loading,
    /// Structure parsed; subresources may still be loading.
    Interactive,
    Complete,
}

impl ReadyState {
    /// Structural DOM is available. The registry never waits for `Complete`.
    pub fn is_ready(self) -> bool {
        !matches!(self, ReadyState::Loading)
    }
}

/// Handle to a menu container created by a [`HostPage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContainerId(pub u64);

/// The page the menu is rendered into.
pub trait HostPage: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    /// Whether an element matching `selector` is present.
    fn has_anchor(&self, selector: &str) -> bool;

    /// Create an empty menu container under `anchor`.
    fn create_container(&self, anchor: &str) -> ContainerId;

    /// False once the container was removed by something outside the registry.
    fn container_exists(&self, id: ContainerId) -> bool;

    /// Replace the container's visible items.
    fn set_items(&self, id: ContainerId, labels: &[String]);
}

/// Activation event passed through a rendered item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClickEvent {
    default_prevented: bool,
}

impl ClickEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }
}

#[derive(Debug)]
struct Container {
    anchor: String,
    items: Vec<String>,
}

#[derive(Debug)]
struct PageInner {
    ready: ReadyState,
    anchors: HashSet<String>,
    containers: BTreeMap<ContainerId, Container>,
    next_id: u64,
}

/// In-memory host page for tests and headless embedding.
#[derive(Debug)]
pub struct MemoryPage {
    inner: Mutex<PageInner>,
}

impl MemoryPage {
    pub fn new(ready: ReadyState) -> Self {
        Self {
            inner: Mutex::new(PageInner {
                ready,
                anchors: HashSet::new(),
                containers: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn with_anchor(self, selector: &str) -> Self {
        self.add_anchor(selector);
        self
    }

    pub fn add_anchor(&self, selector: &str) {
        self.inner.lock().anchors.insert(selector.to_string());
    }

    pub fn set_ready_state(&self, ready: ReadyState) {
        self.inner.lock().ready = ready;
    }

    /// Simulate another script or a page update deleting the container.
    pub fn remove_container(&self, id: ContainerId) -> bool {
        self.inner.lock().containers.remove(&id).is_some()
    }

    pub fn container_count(&self) -> usize {
        self.inner.lock().containers.len()
    }

    /// Items of the single live container, if any.
    pub fn rendered_labels(&self) -> Option<Vec<String>> {
        let inner = self.inner.lock();
        inner.containers.values().next().map(|c| c.items.clone())
    }

    /// Anchor the live container was inserted under.
    pub fn container_anchor(&self) -> Option<String> {
        let inner = self.inner.lock();
        inner.containers.values().next().map(|c| c.anchor.clone())
    }
}

impl HostPage for MemoryPage {
    fn ready_state(&self) -> ReadyState {
        self.inner.lock().ready
    }

    fn has_anchor(&self, selector: &str) -> bool {
        self.inner.lock().anchors.contains(selector)
    }

    fn create_container(&self, anchor: &str) -> ContainerId {
        let mut inner = self.inner.lock();
        let id = ContainerId(inner.next_id);
        inner.next_id += 1;
        inner.containers.insert(id, Container { anchor: anchor.to_string(), items: Vec::new() });
        id
    }

    fn container_exists(&self, id: ContainerId) -> bool {
        self.inner.lock().containers.contains_key(&id)
    }

    fn set_items(&self, id: ContainerId, labels: &[String]) {
        if let Some(container) = self.inner.lock().containers.get_mut(&id) {
            container.items = labels.to_vec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interactive_counts_as_ready() {
        assert!(!ReadyState::Loading.is_ready());
        assert!(ReadyState::Interactive.is_ready());
        assert!(ReadyState::Complete.is_ready());
    }

    #[test]
    fn removed_container_is_gone() {
        let page = MemoryPage::new(ReadyState::Complete).with_anchor("#header");
        let id = page.create_container("#header");
        assert!(page.container_exists(id));
        assert!(page.remove_container(id));
        assert!(!page.container_exists(id));
        assert_eq!(page.rendered_labels(), None);
    }
}
