//! Platform windowing seam.
//!
//! The hub never creates windows itself; it asks a [`Windowing`]
//! implementation. [`RecordingWindowing`] keeps every request in memory and
//! serves a fixed active tab, for headless embedding and tests.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::config::WindowDims;
use crate::protocol::TabInfo;

/// Windows and tabs of the host browser.
#[async_trait]
pub trait Windowing: Send + Sync {
    /// Open a popup window at `url`.
    fn open_window(&self, url: &str, dims: WindowDims) -> anyhow::Result<()>;

    /// Bring the window of `page_key` forward.
    fn focus_window(&self, page_key: &str);

    /// Tab the user is looking at, if any.
    async fn query_active_tab(&self) -> Option<TabInfo>;
}

/// One request made to a [`RecordingWindowing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowRequest {
    /// `open_window(url, dims)`.
    Open {
        /// Window address.
        url: String,
        /// Window size.
        dims: WindowDims,
    },
    /// `focus_window(page_key)`.
    Focus {
        /// Page brought forward.
        page_key: String,
    },
}

/// In-memory [`Windowing`].
#[derive(Debug, Default)]
pub struct RecordingWindowing {
    requests: Mutex<Vec<WindowRequest>>,
    active_tab: Mutex<Option<TabInfo>>,
    fail_open: Mutex<bool>,
}

impl RecordingWindowing {
    /// Create with no active tab.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tab returned by `query_active_tab`.
    pub fn set_active_tab(&self, tab: Option<TabInfo>) {
        *self.active_tab.lock().unwrap_or_else(PoisonError::into_inner) = tab;
    }

    /// Make `open_window` fail (or succeed again).
    pub fn set_fail_open(&self, fail: bool) {
        *self.fail_open.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    /// All requests so far.
    pub fn requests(&self) -> Vec<WindowRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Addresses of all opened windows.
    pub fn opened(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r {
                WindowRequest::Open { url, .. } => Some(url),
                WindowRequest::Focus { .. } => None,
            })
            .collect()
    }

    fn record(&self, request: WindowRequest) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
    }
}

#[async_trait]
impl Windowing for RecordingWindowing {
    fn open_window(&self, url: &str, dims: WindowDims) -> anyhow::Result<()> {
        if *self.fail_open.lock().unwrap_or_else(PoisonError::into_inner) {
            anyhow::bail!("window creation refused");
        }
        self.record(WindowRequest::Open {
            url: url.to_string(),
            dims,
        });
        Ok(())
    }

    fn focus_window(&self, page_key: &str) {
        self.record(WindowRequest::Focus {
            page_key: page_key.to_string(),
        });
    }

    async fn query_active_tab(&self) -> Option<TabInfo> {
        self.active_tab
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
