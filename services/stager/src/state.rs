//! Application state shared across request handlers.

use std::sync::Arc;

use stager_bbs::StagerBbs;

use crate::stager::Stager;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    stager: Stager,
    bbs: Arc<dyn StagerBbs>,
}

impl AppState {
    /// Create application state around a stager and the board it stages to.
    pub fn new(stager: Stager, bbs: Arc<dyn StagerBbs>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { stager, bbs }),
        }
    }

    pub fn stager(&self) -> &Stager {
        &self.inner.stager
    }

    /// Board used for readiness checks.
    pub fn bbs(&self) -> &dyn StagerBbs {
        self.inner.bbs.as_ref()
    }
}
