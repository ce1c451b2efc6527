use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::page::{ClickEvent, ContainerId, HostPage};

/// Navigation list the menu normally lives in.
pub const PREFERRED_ANCHOR: &str = "ul.primary.navigation.actions";

/// Tried in order when the preferred anchor is missing.
pub const FALLBACK_ANCHORS: [&str; 2] = ["#header ul.navigation", "#header"];

pub const DEFAULT_WAIT_ATTEMPTS: u32 = 50;
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(100);

pub type ClickHandler = Arc<dyn Fn() + Send + Sync>;

/// One contributed action. `on_click` is optional so that registrations from
/// untrusted callers can be rejected rather than panicking later.
#[derive(Clone)]
pub struct MenuItem {
    pub label: String,
    pub on_click: Option<ClickHandler>,
}

impl MenuItem {
    pub fn new(label: impl Into<String>, on_click: impl Fn() + Send + Sync + 'static) -> Self {
        Self { label: label.into(), on_click: Some(Arc::new(on_click)) }
    }

    pub fn without_handler(label: impl Into<String>) -> Self {
        Self { label: label.into(), on_click: None }
    }

    fn is_valid(&self) -> bool {
        !self.label.trim().is_empty() && self.on_click.is_some()
    }
}

impl std::fmt::Debug for MenuItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MenuItem")
            .field("label", &self.label)
            .field("on_click", &self.on_click.is_some())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryState {
    Uninitialized,
    ContainerCreated,
    Rendered,
}

struct Inner {
    items: Vec<MenuItem>,
    container: Option<ContainerId>,
    state: RegistryState,
    /// A render was requested while the page was still loading.
    deferred: bool,
}

pub struct MenuRegistry {
    page: Arc<dyn HostPage>,
    inner: Mutex<Inner>,
}

impl MenuRegistry {
    pub fn new(page: Arc<dyn HostPage>) -> Self {
        Self {
            page,
            inner: Mutex::new(Inner {
                items: Vec::new(),
                container: None,
                state: RegistryState::Uninitialized,
                deferred: false,
            }),
        }
    }

    /// Append an item and re-render. Returns false, leaving the registry
    /// untouched, for a blank label or a missing handler.
    pub fn register(&self, item: MenuItem) -> bool {
        if !item.is_valid() {
            tracing::debug!(label = %item.label, "menu: ignoring invalid registration");
            return false;
        }
        self.inner.lock().items.push(item);
        self.render();
        true
    }

    /// Rebuild the visible list from the registered items, creating the
    /// container if needed. Deferred while the page is loading; a silent
    /// no-op when no anchor exists.
    pub fn render(&self) {
        let mut inner = self.inner.lock();
        if !self.page.ready_state().is_ready() {
            inner.deferred = true;
            return;
        }
        inner.deferred = false;

        let Some(id) = self.ensure_container(&mut inner) else {
            tracing::debug!("menu: no anchor on page, not rendering");
            return;
        };
        let labels: Vec<String> = inner.items.iter().map(|i| i.label.clone()).collect();
        self.page.set_items(id, &labels);
        inner.state = RegistryState::Rendered;
    }

    /// Host signal that the structural DOM is ready.
    pub fn document_ready(&self) {
        let deferred = self.inner.lock().deferred;
        if deferred {
            self.render();
        }
    }

    fn ensure_container(&self, inner: &mut Inner) -> Option<ContainerId> {
        if let Some(id) = inner.container {
            if self.page.container_exists(id) {
                return Some(id);
            }
            tracing::debug!("menu: container was removed, recreating");
            inner.container = None;
            inner.state = RegistryState::Uninitialized;
        }

        let anchor = std::iter::once(PREFERRED_ANCHOR)
            .chain(FALLBACK_ANCHORS)
            .find(|a| self.page.has_anchor(a))?;
        let id = self.page.create_container(anchor);
        inner.container = Some(id);
        inner.state = RegistryState::ContainerCreated;
        Some(id)
    }

    /// Activate the rendered item at `index`. Returns the event with its
    /// default action prevented, or None when nothing is rendered there.
    pub fn click(&self, index: usize) -> Option<ClickEvent> {
        let handler = {
            let inner = self.inner.lock();
            if inner.state != RegistryState::Rendered {
                return None;
            }
            let id = inner.container?;
            if !self.page.container_exists(id) {
                return None;
            }
            inner.items.get(index)?.on_click.clone()?
        };
        // Lock released: handlers may register further items.
        let mut event = ClickEvent::new();
        event.prevent_default();
        handler();
        Some(event)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.inner.lock().items.iter().map(|i| i.label.clone()).collect()
    }

    pub fn state(&self) -> RegistryState {
        self.inner.lock().state
    }
}

/// Install-if-absent holder for a registry.
pub struct RegistrySlot {
    cell: OnceLock<Arc<MenuRegistry>>,
}

impl RegistrySlot {
    pub const fn new() -> Self {
        Self { cell: OnceLock::new() }
    }

    /// Install a registry over `page` unless one exists. Either way the
    /// installed instance is returned.
    pub fn install(&self, page: Arc<dyn HostPage>) -> Arc<MenuRegistry> {
        let mut fresh = false;
        let registry = self.cell.get_or_init(|| {
            fresh = true;
            Arc::new(MenuRegistry::new(page))
        });
        if fresh {
            tracing::info!("menu: registry installed");
        } else {
            tracing::debug!("menu: registry already installed, reusing");
        }
        registry.clone()
    }

    pub fn get(&self) -> Option<Arc<MenuRegistry>> {
        self.cell.get().cloned()
    }

    /// Poll for an installed registry, giving up after `attempts` checks.
    pub async fn wait(&self, attempts: u32, interval: Duration) -> Option<Arc<MenuRegistry>> {
        for attempt in 0..attempts {
            if let Some(registry) = self.get() {
                return Some(registry);
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        tracing::warn!(attempts, "menu: registry never appeared, giving up");
        None
    }
}

impl Default for RegistrySlot {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: RegistrySlot = RegistrySlot::new();

/// Install the page-wide registry if absent.
pub fn install(page: Arc<dyn HostPage>) -> Arc<MenuRegistry> {
    GLOBAL.install(page)
}

pub fn global() -> Option<Arc<MenuRegistry>> {
    GLOBAL.get()
}

/// Poll for the page-wide registry. Late-loading scripts use this since
/// load order across scripts is not known.
pub async fn wait_for_registry(attempts: u32, interval: Duration) -> Option<Arc<MenuRegistry>> {
    GLOBAL.wait(attempts, interval).await
}
