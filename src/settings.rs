//! Per-viewer zoom and color filter state

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::debug;

use crate::SettingsConfig;

pub const ZOOM_MIN_TENTHS: u8 = 10;
pub const ZOOM_MAX_TENTHS: u8 = 30;

/// Opaque token tying a browser session to its settings
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewerId(Arc<str>);

impl ViewerId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Fresh random identifier
    pub fn mint() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Color transform applied after zoom
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    None,
    Grayscale,
    Invert,
    Red,
    Green,
    Blue,
    /// Name we don't know; kept verbatim and rendered as passthrough
    Unrecognized(String),
}

impl Filter {
    pub fn parse(name: &str) -> Self {
        match name {
            "none" => Filter::None,
            "grayscale" => Filter::Grayscale,
            "invert" => Filter::Invert,
            "red" => Filter::Red,
            "green" => Filter::Green,
            "blue" => Filter::Blue,
            other => Filter::Unrecognized(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Filter::None => "none",
            Filter::Grayscale => "grayscale",
            Filter::Invert => "invert",
            Filter::Red => "red",
            Filter::Green => "green",
            Filter::Blue => "blue",
            Filter::Unrecognized(name) => name,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomDirection {
    In,
    Out,
}

impl ZoomDirection {
    pub fn parse(direction: &str) -> Option<Self> {
        match direction {
            "in" => Some(ZoomDirection::In),
            "out" => Some(ZoomDirection::Out),
            _ => None,
        }
    }
}

/// One viewer's view of the feed.
///
/// Zoom is kept in tenths so repeated 0.1 steps land exactly on the bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerSettings {
    zoom_tenths: u8,
    pub filter: Filter,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            zoom_tenths: ZOOM_MIN_TENTHS,
            filter: Filter::None,
        }
    }
}

impl ViewerSettings {
    /// Settings with the zoom factor rounded to the nearest tenth and clamped
    pub fn new(zoom: f32, filter: Filter) -> Self {
        let tenths = (zoom * 10.0).round().clamp(ZOOM_MIN_TENTHS as f32, ZOOM_MAX_TENTHS as f32);
        Self {
            zoom_tenths: tenths as u8,
            filter,
        }
    }

    pub fn zoom(&self) -> f32 {
        self.zoom_tenths as f32 / 10.0
    }

    pub fn zoom_tenths(&self) -> u8 {
        self.zoom_tenths
    }

    /// Step zoom by 0.1, clamped to [1.0, 3.0]
    pub fn step_zoom(&mut self, direction: ZoomDirection) {
        self.zoom_tenths = match direction {
            ZoomDirection::In => (self.zoom_tenths + 1).min(ZOOM_MAX_TENTHS),
            ZoomDirection::Out => self.zoom_tenths.saturating_sub(1).max(ZOOM_MIN_TENTHS),
        };
    }
}

struct Entry {
    settings: ViewerSettings,
    touched: Instant,
}

impl Entry {
    fn new() -> Self {
        Self {
            settings: ViewerSettings::default(),
            touched: Instant::now(),
        }
    }
}

/// Concurrent viewer id → settings map.
///
/// Entries live in independently locked shards, so one viewer's update
/// never waits on another viewer's read in a different shard. With
/// `max_viewers` set, the least recently touched entry is evicted to make
/// room for a new viewer; otherwise entries are kept for the process
/// lifetime.
pub struct SettingsStore {
    entries: DashMap<ViewerId, Entry>,
    max_viewers: Option<usize>,
}

impl SettingsStore {
    pub fn new(config: &SettingsConfig) -> Self {
        Self {
            entries: DashMap::new(),
            max_viewers: config.max_viewers.filter(|&n| n > 0),
        }
    }

    /// Current settings for `viewer`, creating the default entry if needed
    pub fn get_or_default(&self, viewer: &ViewerId) -> ViewerSettings {
        self.update(viewer, |_| {})
    }

    /// Store a filter by name. Unknown names are kept as-is.
    pub fn set_filter(&self, viewer: &ViewerId, name: &str) -> Filter {
        let filter = Filter::parse(name);
        self.update(viewer, |settings| settings.filter = filter.clone());
        debug!(%viewer, filter = %filter, "filter set");
        filter
    }

    /// Step the viewer's zoom and return the resulting settings
    pub fn adjust_zoom(&self, viewer: &ViewerId, direction: ZoomDirection) -> ViewerSettings {
        let settings = self.update(viewer, |settings| settings.step_zoom(direction));
        debug!(%viewer, zoom = settings.zoom(), "zoom adjusted");
        settings
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, viewer: &ViewerId) -> bool {
        self.entries.contains_key(viewer)
    }

    fn update(&self, viewer: &ViewerId, f: impl FnOnce(&mut ViewerSettings)) -> ViewerSettings {
        let mut inserted = false;
        let settings = {
            // The entry guard holds only this key's shard
            let mut entry = self.entries.entry(viewer.clone()).or_insert_with(|| {
                inserted = true;
                Entry::new()
            });
            f(&mut entry.settings);
            entry.touched = Instant::now();
            entry.settings.clone()
        };

        if inserted {
            self.enforce_cap(viewer);
        }
        settings
    }

    /// Evict other viewers, oldest first, until the cap holds again.
    ///
    /// Runs after the insert so concurrent newcomers each trim for their
    /// own entry; the map can exceed the cap only between an insert and
    /// its trim.
    fn enforce_cap(&self, keep: &ViewerId) {
        let Some(max) = self.max_viewers else {
            return;
        };

        while self.entries.len() > max {
            let oldest = self
                .entries
                .iter()
                .filter(|entry| entry.key() != keep)
                .min_by_key(|entry| entry.touched)
                .map(|entry| entry.key().clone());

            match oldest {
                Some(id) => {
                    debug!(viewer = %id, "evicting idle viewer settings");
                    self.entries.remove(&id);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SettingsStore {
        SettingsStore::new(&SettingsConfig::default())
    }

    #[test]
    fn defaults_are_created_lazily() {
        let store = store();
        let viewer = ViewerId::new("a");
        assert!(!store.contains(&viewer));

        let settings = store.get_or_default(&viewer);
        assert_eq!(settings.zoom(), 1.0);
        assert_eq!(settings.filter, Filter::None);
        assert!(store.contains(&viewer));
    }

    #[test]
    fn zoom_clamps_exactly_at_bounds() {
        let store = store();
        let viewer = ViewerId::new("a");

        let mut settings = store.get_or_default(&viewer);
        for _ in 0..50 {
            settings = store.adjust_zoom(&viewer, ZoomDirection::In);
        }
        assert_eq!(settings.zoom(), 3.0);
        assert_eq!(format!("{:.1}", settings.zoom()), "3.0");

        for _ in 0..50 {
            settings = store.adjust_zoom(&viewer, ZoomDirection::Out);
        }
        assert_eq!(settings.zoom(), 1.0);
    }

    #[test]
    fn zoom_out_from_default_stays_at_one() {
        let store = store();
        let settings = store.adjust_zoom(&ViewerId::new("fresh"), ZoomDirection::Out);
        assert_eq!(settings.zoom(), 1.0);
    }

    #[test]
    fn unknown_filter_is_stored_verbatim() {
        let store = store();
        let viewer = ViewerId::new("a");

        let applied = store.set_filter(&viewer, "sepia");
        assert_eq!(applied, Filter::Unrecognized("sepia".into()));
        assert_eq!(applied.to_string(), "sepia");
        assert_eq!(store.get_or_default(&viewer).filter.name(), "sepia");
    }

    #[test]
    fn viewers_are_independent() {
        let store = store();
        let a = ViewerId::new("a");
        let b = ViewerId::new("b");

        store.set_filter(&a, "invert");
        store.adjust_zoom(&b, ZoomDirection::In);

        assert_eq!(store.get_or_default(&a), ViewerSettings::new(1.0, Filter::Invert));
        assert_eq!(store.get_or_default(&b), ViewerSettings::new(1.1, Filter::None));
    }

    #[test]
    fn cap_evicts_least_recently_touched() {
        let store = SettingsStore::new(&SettingsConfig {
            max_viewers: Some(2),
        });
        let (a, b, c) = (ViewerId::new("a"), ViewerId::new("b"), ViewerId::new("c"));

        store.set_filter(&a, "red");
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.set_filter(&b, "blue");
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.get_or_default(&a);
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.get_or_default(&c);

        assert_eq!(store.len(), 2);
        assert!(store.contains(&a));
        assert!(!store.contains(&b));
        assert!(store.contains(&c));
    }

    #[test]
    fn cap_holds_under_concurrent_newcomers() {
        let store = Arc::new(SettingsStore::new(&SettingsConfig {
            max_viewers: Some(4),
        }));
        let barrier = Arc::new(std::sync::Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    for round in 0..20 {
                        store.get_or_default(&ViewerId::new(format!("viewer-{i}-{round}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(store.len() <= 4, "{} entries", store.len());
        assert!(!store.is_empty());
    }

    #[test]
    fn concurrent_updates_do_not_cross_viewers() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let viewer = ViewerId::new(format!("viewer-{i}"));
                    for _ in 0..i {
                        store.adjust_zoom(&viewer, ZoomDirection::In);
                    }
                    store.set_filter(&viewer, if i % 2 == 0 { "red" } else { "invert" });
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..8u8 {
            let settings = store.get_or_default(&ViewerId::new(format!("viewer-{i}")));
            assert_eq!(settings.zoom_tenths(), 10 + i);
            let expected = if i % 2 == 0 { Filter::Red } else { Filter::Invert };
            assert_eq!(settings.filter, expected);
        }
    }
}
