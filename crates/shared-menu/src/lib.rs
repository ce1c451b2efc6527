//! Shared menu registry.
//!
//! Independently loaded scripts each contribute a labelled action to one
//! menu on the host page. Whichever script runs first installs the registry;
//! the rest find it through [`install`] (install-if-absent) or by polling
//! with [`wait_for_registry`].

mod page;
mod registry;

pub use page::{ClickEvent, ContainerId, HostPage, MemoryPage, ReadyState};
pub use registry::{
    global, install, wait_for_registry, ClickHandler, MenuItem, MenuRegistry, RegistrySlot,
    RegistryState, DEFAULT_WAIT_ATTEMPTS, DEFAULT_WAIT_INTERVAL, FALLBACK_ANCHORS,
    PREFERRED_ANCHOR,
};
