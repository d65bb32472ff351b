//! Pagination state types and the windowing/trim algorithm (spec §4.9).

use std::time::Duration;

use storex_core::contracts::PageDirection;
use storex_core::{Instant, StorexError};

use crate::config::EngineConfig;

/// Per-direction load status.
#[derive(Debug, Clone, Default)]
pub enum LoadState {
    /// No load is in flight for this direction.
    #[default]
    NotLoading,
    /// A load is currently in flight.
    Loading,
    /// The last load attempt failed.
    Error {
        /// The underlying cause.
        cause: StorexError,
        /// Whether the previously-cached pages may still be served despite the error.
        can_serve_stale: bool,
    },
}

impl LoadState {
    /// Whether a load is currently in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading)
    }
}

/// Load status for each of the three directions a key can be paginated in.
#[derive(Debug, Clone, Default)]
pub struct LoadStates {
    /// Status of the first (page-establishing) load.
    pub initial: LoadState,
    /// Status of the most recent forward (toward `next`) load.
    pub append: LoadState,
    /// Status of the most recent backward (toward `prev`) load.
    pub prepend: LoadState,
}

impl LoadStates {
    pub(crate) fn get(&self, direction: PageDirection) -> &LoadState {
        match direction {
            PageDirection::Initial => &self.initial,
            PageDirection::Append => &self.append,
            PageDirection::Prepend => &self.prepend,
        }
    }

    pub(crate) fn set(&mut self, direction: PageDirection, state: LoadState) {
        match direction {
            PageDirection::Initial => self.initial = state,
            PageDirection::Append => self.append = state,
            PageDirection::Prepend => self.prepend = state,
        }
    }
}

/// One loaded page of items plus the continuation tokens bracketing it.
#[derive(Debug, Clone)]
pub struct Page<Token, Item> {
    /// The items this page holds, in forward order.
    pub items: Vec<Item>,
    /// Token to continue a [`PageDirection::Prepend`] load from.
    pub prev: Option<Token>,
    /// Token to continue a [`PageDirection::Append`] load from.
    pub next: Option<Token>,
    /// When this page was stored, for `page_ttl` freshness checks.
    pub stored_at: Instant,
}

/// Per-key pagination tunables. The first subscriber's config wins; later
/// subscribers to the same key reuse it.
#[derive(Debug, Clone)]
pub struct PagingConfig {
    /// Target number of items per loaded page.
    pub page_size: usize,
    /// Items remaining before a consumer should prefetch the next page.
    pub prefetch_distance: usize,
    /// Maximum total items retained in memory before windowing trims the tail.
    pub max_size_items: usize,
    /// How long a page may be served under `CachedOrFetch` before a background refresh fires.
    pub page_ttl: Duration,
}

impl PagingConfig {
    /// Build a config from the engine-wide defaults.
    #[must_use]
    pub fn from_engine_config(cfg: &EngineConfig) -> Self {
        Self {
            page_size: cfg.default_page_size,
            prefetch_distance: cfg.default_prefetch_distance,
            max_size_items: cfg.default_max_size_items,
            page_ttl: cfg.default_page_ttl,
        }
    }
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self::from_engine_config(&EngineConfig::default())
    }
}

/// One emission of a key's pagination state.
#[derive(Debug, Clone)]
pub enum PagingEvent<Token, Item> {
    /// The current window: concatenated items across retained pages, the
    /// outermost continuation tokens, per-direction load status, and whether
    /// both ends of the sequence have been reached.
    Snapshot {
        /// Items across all retained pages, in forward order.
        items: Vec<Item>,
        /// Token for the next `Append` load, `None` once the forward end is reached.
        next: Option<Token>,
        /// Token for the next `Prepend` load, `None` once the backward end is reached.
        prev: Option<Token>,
        /// Per-direction load status.
        load_states: LoadStates,
        /// Whether both ends of the sequence have been reached.
        fully_loaded: bool,
    },
}

/// All mutable state tracked for one paginated key.
pub(crate) struct KeyState<Token, Item> {
    pub(crate) pages: Vec<Page<Token, Item>>,
    pub(crate) load_states: LoadStates,
    pub(crate) next_token: Option<Token>,
    pub(crate) prev_token: Option<Token>,
    pub(crate) last_load_at: Option<Instant>,
    pub(crate) fully_loaded: bool,
    pub(crate) initial_load_triggered: bool,
    pub(crate) config: Option<PagingConfig>,
}

impl<Token, Item> Default for KeyState<Token, Item> {
    fn default() -> Self {
        Self {
            pages: Vec::new(),
            load_states: LoadStates::default(),
            next_token: None,
            prev_token: None,
            last_load_at: None,
            fully_loaded: false,
            initial_load_triggered: false,
            config: None,
        }
    }
}

impl<Token: Clone, Item: Clone> KeyState<Token, Item> {
    /// A snapshot event reflecting the current state.
    pub(crate) fn snapshot(&self) -> PagingEvent<Token, Item> {
        PagingEvent::Snapshot {
            items: self.pages.iter().flat_map(|p| p.items.iter().cloned()).collect(),
            next: self.next_token.clone(),
            prev: self.prev_token.clone(),
            load_states: self.load_states.clone(),
            fully_loaded: self.fully_loaded,
        }
    }

    /// Apply a freshly-loaded page per `direction`, then run the
    /// windowing/trim algorithm and recompute the boundary tokens from
    /// whatever pages were retained.
    pub(crate) fn apply_page(&mut self, direction: PageDirection, page: Page<Token, Item>, max_size_items: usize) {
        match direction {
            PageDirection::Initial => self.pages = vec![page],
            PageDirection::Append => self.pages.push(page),
            PageDirection::Prepend => self.pages.insert(0, page),
        }
        trim_to_window(&mut self.pages, direction, max_size_items);
        self.next_token = self.pages.last().and_then(|p| p.next.clone());
        self.prev_token = self.pages.first().and_then(|p| p.prev.clone());
        self.fully_loaded = self.next_token.is_none() && self.prev_token.is_none();
    }
}

/// Drop whole pages from the end opposite the load direction until the
/// window is back under `max_size_items`, then trim partial items from the
/// remaining boundary page. Token recomputation happens in the caller, from
/// whatever pages this leaves behind.
fn trim_to_window<Token, Item>(pages: &mut Vec<Page<Token, Item>>, direction: PageDirection, max_size_items: usize) {
    let total: usize = pages.iter().map(|p| p.items.len()).sum();
    if total <= max_size_items || pages.is_empty() {
        return;
    }
    let mut overflow = total - max_size_items;

    match direction {
        PageDirection::Append | PageDirection::Initial => {
            while overflow > 0 && pages.len() > 1 && pages[0].items.len() <= overflow {
                overflow -= pages.remove(0).items.len();
            }
            if overflow > 0 {
                if let Some(front) = pages.first_mut() {
                    let keep = front.items.len().saturating_sub(overflow);
                    front.items = front.items.split_off(front.items.len() - keep);
                }
            }
        }
        PageDirection::Prepend => {
            while overflow > 0 && pages.len() > 1 && pages[pages.len() - 1].items.len() <= overflow {
                overflow -= pages.pop().expect("checked non-empty above").items.len();
            }
            if overflow > 0 {
                if let Some(back) = pages.last_mut() {
                    let keep = back.items.len().saturating_sub(overflow);
                    back.items.truncate(keep);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(items: Vec<u32>, prev: Option<u32>, next: Option<u32>) -> Page<u32, u32> {
        Page { items, prev, next, stored_at: Instant::ZERO }
    }

    #[test]
    fn initial_load_replaces_pages_and_sets_tokens() {
        let mut state = KeyState::<u32, u32>::default();
        state.apply_page(PageDirection::Initial, page(vec![1, 2, 3], Some(0), Some(4)), 200);
        assert_eq!(state.pages.len(), 1);
        assert_eq!(state.next_token, Some(4));
        assert_eq!(state.prev_token, Some(0));
        assert!(!state.fully_loaded);
    }

    #[test]
    fn fully_loaded_once_both_tokens_exhausted() {
        let mut state = KeyState::<u32, u32>::default();
        state.apply_page(PageDirection::Initial, page(vec![1, 2], None, None), 200);
        assert!(state.fully_loaded);
    }

    #[test]
    fn append_extends_window_and_updates_next_token() {
        let mut state = KeyState::<u32, u32>::default();
        state.apply_page(PageDirection::Initial, page(vec![1, 2], Some(0), Some(3)), 200);
        state.apply_page(PageDirection::Append, page(vec![3, 4], Some(2), Some(5)), 200);
        assert_eq!(state.pages.len(), 2);
        assert_eq!(state.next_token, Some(5));
        assert_eq!(state.prev_token, Some(0));
    }

    #[test]
    fn trim_drops_whole_pages_opposite_append_direction() {
        let mut state = KeyState::<u32, u32>::default();
        state.apply_page(PageDirection::Initial, page(vec![1, 2], Some(0), Some(3)), 4);
        state.apply_page(PageDirection::Append, page(vec![3, 4], Some(2), Some(5)), 4);
        // exactly at budget: nothing trimmed yet.
        assert_eq!(state.pages.len(), 2);
        state.apply_page(PageDirection::Append, page(vec![5, 6], Some(4), Some(7)), 4);
        // now over budget by 2: the whole first page (2 items) is dropped.
        assert_eq!(state.pages.len(), 2);
        let total: usize = state.pages.iter().map(|p| p.items.len()).sum();
        assert_eq!(total, 4);
        assert_eq!(state.prev_token, Some(2));
        assert_eq!(state.next_token, Some(7));
    }

    #[test]
    fn trim_partially_truncates_boundary_page_when_whole_pages_are_not_enough() {
        let mut state = KeyState::<u32, u32>::default();
        state.apply_page(PageDirection::Initial, page(vec![1, 2, 3], Some(0), Some(4)), 5);
        state.apply_page(PageDirection::Append, page(vec![4, 5, 6], Some(3), Some(7)), 5);
        // total 6 over budget of 5: drop 1 from the oldest page, keep its tail.
        assert_eq!(state.pages.len(), 2);
        let total: usize = state.pages.iter().map(|p| p.items.len()).sum();
        assert_eq!(total, 5);
        assert_eq!(state.pages[0].items, vec![2, 3]);
    }

    #[test]
    fn trim_opposite_direction_for_prepend() {
        let mut state = KeyState::<u32, u32>::default();
        state.apply_page(PageDirection::Initial, page(vec![5, 6], Some(4), Some(7)), 4);
        state.apply_page(PageDirection::Prepend, page(vec![3, 4], Some(2), Some(5)), 4);
        state.apply_page(PageDirection::Prepend, page(vec![1, 2], Some(0), Some(3)), 4);
        // over budget: drop the newest whole page (opposite of prepend).
        let total: usize = state.pages.iter().map(|p| p.items.len()).sum();
        assert_eq!(total, 4);
        assert_eq!(state.prev_token, Some(0));
    }
}
