//! Page context registry.
//!
//! One [`PageContext`] per open surface, keyed by page key. A context is
//! created only by an explicit open request and carries at most one live
//! port; attaching a second port is rejected.

use std::collections::HashMap;

use super::port::{PortId, SurfacePort};
use super::HubError;
use crate::protocol::TabInfo;

/// State of one logical UI surface.
#[derive(Debug)]
pub struct PageContext {
    /// Unique key of the surface.
    pub page_key: String,
    /// Port of the surface once it has connected.
    pub port: Option<SurfacePort>,
    /// Tab the surface operates on, if it was opened for one.
    pub tab: Option<TabInfo>,
}

/// Read-only view of a context, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    /// Page key.
    pub page_key: String,
    /// Whether the surface has connected.
    pub connected: bool,
    /// Current tab snapshot.
    pub tab: Option<TabInfo>,
}

/// All live page contexts.
#[derive(Debug, Default)]
pub struct PageRegistry {
    pages: HashMap<String, PageContext>,
}

impl PageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for `page_key`.
    pub fn get(&self, page_key: &str) -> Option<&PageContext> {
        self.pages.get(page_key)
    }

    /// Mutable context for `page_key`.
    pub fn get_mut(&mut self, page_key: &str) -> Option<&mut PageContext> {
        self.pages.get_mut(page_key)
    }

    /// Whether a context exists for `page_key`.
    pub fn contains(&self, page_key: &str) -> bool {
        self.pages.contains_key(page_key)
    }

    /// Create a portless context. Returns `false` if one already exists.
    pub fn create(&mut self, page_key: &str, tab: Option<TabInfo>) -> bool {
        if self.pages.contains_key(page_key) {
            return false;
        }
        self.pages.insert(
            page_key.to_string(),
            PageContext {
                page_key: page_key.to_string(),
                port: None,
                tab,
            },
        );
        true
    }

    /// Attach `port` to the context of `page_key`.
    ///
    /// Fails for an unknown key and for a context that already has a port.
    pub fn attach(&mut self, page_key: &str, port: SurfacePort) -> Result<&PageContext, HubError> {
        let ctx = self
            .pages
            .get_mut(page_key)
            .ok_or_else(|| HubError::ProtocolViolation {
                page_key: page_key.to_string(),
                reason: "connect without a prior open request".to_string(),
            })?;

        if let Some(existing) = &ctx.port {
            return Err(HubError::ProtocolViolation {
                page_key: page_key.to_string(),
                reason: format!("duplicate connect, {} is already attached", existing.id()),
            });
        }

        ctx.port = Some(port);
        Ok(ctx)
    }

    /// Remove and return the context of `page_key`.
    pub fn remove(&mut self, page_key: &str) -> Option<PageContext> {
        self.pages.remove(page_key)
    }

    /// Key of the context whose port is `port_id`.
    pub fn key_for_port(&self, port_id: PortId) -> Option<&str> {
        self.pages
            .values()
            .find(|ctx| ctx.port.as_ref().is_some_and(|p| p.id() == port_id))
            .map(|ctx| ctx.page_key.as_str())
    }

    /// Remove every context.
    pub fn drain(&mut self) -> impl Iterator<Item = PageContext> + '_ {
        self.pages.drain().map(|(_, ctx)| ctx)
    }

    /// Number of contexts.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Snapshot of all contexts, sorted by key.
    pub fn snapshot(&self) -> Vec<PageInfo> {
        let mut pages: Vec<_> = self
            .pages
            .values()
            .map(|ctx| PageInfo {
                page_key: ctx.page_key.clone(),
                connected: ctx.port.is_some(),
                tab: ctx.tab.clone(),
            })
            .collect();
        pages.sort_by(|a, b| a.page_key.cmp(&b.page_key));
        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_is_exclusive() {
        let mut registry = PageRegistry::new();
        assert!(registry.create("tagsTree", None));
        assert!(!registry.create("tagsTree", Some(TabInfo::new("u", "t"))));
        assert_eq!(registry.get("tagsTree").unwrap().tab, None);
    }

    #[test]
    fn test_attach_rules() {
        let mut registry = PageRegistry::new();
        let (port, _rx) = SurfacePort::new(PortId(1));
        assert!(matches!(
            registry.attach("getBookmark", port.clone()),
            Err(HubError::ProtocolViolation { .. })
        ));
        // A failed attach must not create state.
        assert!(registry.is_empty());

        registry.create("getBookmark", Some(TabInfo::new("u", "t")));
        registry.attach("getBookmark", port).unwrap();
        assert_eq!(registry.key_for_port(PortId(1)), Some("getBookmark"));

        let (second, _rx2) = SurfacePort::new(PortId(2));
        assert!(matches!(
            registry.attach("getBookmark", second),
            Err(HubError::ProtocolViolation { .. })
        ));
        // The first port stays attached.
        assert_eq!(registry.key_for_port(PortId(1)), Some("getBookmark"));
        assert_eq!(registry.key_for_port(PortId(2)), None);
    }

    #[test]
    fn test_snapshot_sorted() {
        let mut registry = PageRegistry::new();
        registry.create("tagsTree", None);
        registry.create("editTag-1", None);
        let keys: Vec<_> = registry.snapshot().into_iter().map(|p| p.page_key).collect();
        assert_eq!(keys, ["editTag-1", "tagsTree"]);
        assert_eq!(registry.drain().count(), 2);
        assert_eq!(registry.len(), 0);
    }
}
