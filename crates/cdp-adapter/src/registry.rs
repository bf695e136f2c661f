//! Tracks the pages this adapter attached to and their CDP sessions.
//!
//! A page keeps its [`PageId`] for the adapter's lifetime. Losing the CDP session (transport
//! drop, tab closed) only detaches it; the tab filter and bindings stay so it can be
//! re-attached to a fresh target.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::ids::{PageId, SessionId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetContext {
    pub session_id: SessionId,
    pub target_id: Option<String>,
    /// `None` while detached.
    pub cdp_session: Option<String>,
    pub main_frame_id: Option<String>,
    /// Filter the page was attached with; reused on re-attach.
    pub url_filter: Option<String>,
    /// Bindings to re-register on a new session.
    pub bindings: Vec<String>,
}

#[derive(Default)]
pub struct Registry {
    pages: DashMap<PageId, TargetContext>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_page(
        &self,
        page: PageId,
        target_id: String,
        cdp_session: String,
        url_filter: Option<String>,
    ) {
        let ctx = TargetContext {
            session_id: SessionId::new(),
            target_id: Some(target_id),
            cdp_session: Some(cdp_session),
            main_frame_id: None,
            url_filter,
            bindings: Vec::new(),
        };
        self.pages.insert(page, ctx);
    }

    /// Drop the page's session. Returns false if it was already detached or unknown.
    pub fn detach(&self, page: &PageId) -> bool {
        let Some(mut entry) = self.pages.get_mut(page) else {
            return false;
        };
        let was_attached = entry.cdp_session.is_some();
        entry.cdp_session = None;
        entry.target_id = None;
        entry.main_frame_id = None;
        was_attached
    }

    pub fn reattach(&self, page: &PageId, target_id: String, cdp_session: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.session_id = SessionId::new();
            entry.target_id = Some(target_id);
            entry.cdp_session = Some(cdp_session);
            entry.main_frame_id = None;
        }
    }

    pub fn detached(&self) -> Vec<PageId> {
        self.pages
            .iter()
            .filter(|kv| kv.value().cdp_session.is_none())
            .map(|kv| *kv.key())
            .collect()
    }

    pub fn remember_binding(&self, page: &PageId, name: &str) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            if !entry.bindings.iter().any(|b| b == name) {
                entry.bindings.push(name.to_string());
            }
        }
    }

    pub fn get(&self, page: &PageId) -> Option<TargetContext> {
        self.pages.get(page).map(|entry| entry.value().clone())
    }

    pub fn iter(&self) -> Vec<(PageId, TargetContext)> {
        self.pages
            .iter()
            .map(|kv| (*kv.key(), kv.value().clone()))
            .collect()
    }

    pub fn set_main_frame(&self, page: &PageId, frame_id: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.main_frame_id = Some(frame_id);
        }
    }

    /// Unknown main frame counts as a match; the first commit may not have been seen yet.
    pub fn is_main_frame(&self, page: &PageId, frame_id: &str) -> bool {
        self.pages
            .get(page)
            .map(|entry| {
                entry
                    .main_frame_id
                    .as_deref()
                    .map_or(true, |main| main == frame_id)
            })
            .unwrap_or(false)
    }

    pub fn get_cdp_session(&self, page: &PageId) -> Option<String> {
        self.pages
            .get(page)
            .and_then(|entry| entry.cdp_session.clone())
    }

    pub fn page_for_target(&self, target_id: &str) -> Option<PageId> {
        self.pages
            .iter()
            .find(|kv| kv.value().target_id.as_deref() == Some(target_id))
            .map(|kv| *kv.key())
    }
}
