//! Named dataset registry.
//!
//! Datasets that share a rowset name are registered under it when bound.
//! The registry resolves lookup datasets by name and fans out change
//! notifications to every live dataset bound to a name. Entries are weak:
//! dropping the last [`SharedNav`] handle unregisters a dataset implicitly.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use horizon_rowset_core::targets;
use parking_lot::RwLock;

use crate::nav::Nav;

/// A dataset shared between views, binders and the registry.
pub type SharedNav = Arc<RwLock<Nav>>;

/// Registry of bound datasets by rowset name.
#[derive(Clone, Default)]
pub struct DatasetRegistry {
    inner: Arc<RwLock<HashMap<String, Vec<Weak<RwLock<Nav>>>>>>,
}

impl fmt::Debug for DatasetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `nav` under `name`. Registering twice is a no-op.
    pub fn register(&self, name: &str, nav: &SharedNav) {
        let mut inner = self.inner.write();
        let entries = inner.entry(name.to_string()).or_default();
        entries.retain(|w| w.strong_count() > 0);
        let weak = Arc::downgrade(nav);
        if !entries.iter().any(|w| w.ptr_eq(&weak)) {
            entries.push(weak);
            tracing::debug!(target: targets::NAV, rowset = name, "dataset registered");
        }
    }

    /// Remove `nav` from `name`.
    pub fn unregister(&self, name: &str, nav: &SharedNav) {
        let mut inner = self.inner.write();
        if let Some(entries) = inner.get_mut(name) {
            let weak = Arc::downgrade(nav);
            entries.retain(|w| w.strong_count() > 0 && !w.ptr_eq(&weak));
            if entries.is_empty() {
                inner.remove(name);
            }
        }
    }

    /// First live dataset registered under `name`.
    pub fn get(&self, name: &str) -> Option<SharedNav> {
        self.inner.read().get(name)?.iter().find_map(Weak::upgrade)
    }

    /// Every live dataset registered under `name`.
    pub fn navs_for(&self, name: &str) -> Vec<SharedNav> {
        self.inner
            .read()
            .get(name)
            .map(|entries| entries.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn all_navs(&self) -> Vec<SharedNav> {
        self.inner
            .read()
            .values()
            .flatten()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// The rowset `name` changed on the server: reload every server-backed
    /// dataset bound to it. Datasets that are locked by the caller are
    /// skipped.
    pub fn rowset_changed(&self, name: &str) {
        for nav in self.navs_for(name) {
            let Some(mut nav) = nav.try_write() else {
                tracing::debug!(target: targets::NAV, rowset = name, "dataset busy, reload skipped");
                continue;
            };
            if !nav.is_server_backed() {
                continue;
            }
            if let Err(err) = nav.reload() {
                tracing::warn!(target: targets::NAV, rowset = name, %err, "reload failed");
            }
        }
    }

    /// The rows of `name` changed: tell datasets with lookup fields into it
    /// that their display values changed.
    pub fn lookup_changed(&self, name: &str) {
        let mut pending = Vec::new();
        for nav in self.all_navs() {
            let Some(nav) = nav.try_read() else {
                continue;
            };
            for field in nav.schema().fields() {
                if field.lookup.as_ref().is_some_and(|l| l.rowset == name) {
                    pending.push((nav.signals().clone(), field.name.clone()));
                }
            }
        }
        for (signals, col) in pending {
            signals.display_vals_changed.emit(Some(col));
        }
    }
}

impl Nav {
    /// Attach a shared dataset to a registry, registering it under its
    /// rowset name.
    pub fn bind(nav: &SharedNav, registry: &DatasetRegistry) {
        let name = {
            let mut guard = nav.write();
            guard.set_registry(Some(registry.clone()));
            guard.name().map(str::to_string)
        };
        if let Some(name) = name {
            registry.register(&name, nav);
            registry.lookup_changed(&name);
        }
    }

    /// Detach a shared dataset from its registry.
    pub fn unbind(nav: &SharedNav) {
        let (registry, name) = {
            let mut guard = nav.write();
            let registry = guard.registry().cloned();
            guard.set_registry(None);
            (registry, guard.name().map(str::to_string))
        };
        if let (Some(registry), Some(name)) = (registry, name) {
            registry.unregister(&name, nav);
            registry.lookup_changed(&name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NavConfig;
    use crate::field::FieldAttrs;
    use crate::transport::RowsetDoc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn shared(name: &str) -> SharedNav {
        Arc::new(RwLock::new(Nav::new(NavConfig::default().with_name(name))))
    }

    #[test]
    fn test_register_and_get() {
        let registry = DatasetRegistry::new();
        let a = shared("users");
        let b = shared("users");
        Nav::bind(&a, &registry);
        Nav::bind(&b, &registry);
        Nav::bind(&b, &registry);

        assert_eq!(registry.navs_for("users").len(), 2);
        assert!(Arc::ptr_eq(&registry.get("users").unwrap(), &a));
        assert!(registry.get("orders").is_none());

        Nav::unbind(&a);
        assert!(Arc::ptr_eq(&registry.get("users").unwrap(), &b));
        assert!(a.read().registry().is_none());
    }

    #[test]
    fn test_dropped_navs_disappear() {
        let registry = DatasetRegistry::new();
        let nav = shared("users");
        Nav::bind(&nav, &registry);
        drop(nav);
        assert!(registry.get("users").is_none());
        assert!(registry.navs_for("users").is_empty());
    }

    #[test]
    fn test_lookup_changed_notifies_consumers() {
        let registry = DatasetRegistry::new();
        let doc = RowsetDoc {
            fields: vec![
                FieldAttrs::named("id"),
                FieldAttrs::named("user_id").with_lookup("users", "id", "name"),
            ],
            ..Default::default()
        };
        let orders = Arc::new(RwLock::new(Nav::from_doc(
            NavConfig::default().with_name("orders"),
            doc,
        )));
        Nav::bind(&orders, &registry);

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        orders
            .read()
            .signals()
            .connect_display_vals_for("user_id", move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            });

        registry.lookup_changed("users");
        registry.lookup_changed("products");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lookup_display_defaults_to_name_column() {
        let registry = DatasetRegistry::new();
        let users_doc = RowsetDoc {
            fields: vec![FieldAttrs::named("id"), FieldAttrs::named("name")],
            rows: vec![vec![1.into(), "Ann".into()]],
            name_col: Some("name".to_string()),
            ..Default::default()
        };
        let users = Arc::new(RwLock::new(Nav::from_doc(
            NavConfig::default().with_name("users"),
            users_doc,
        )));
        Nav::bind(&users, &registry);

        let user_id = FieldAttrs {
            lookup_rowset: Some("users".to_string()),
            lookup_col: Some("id".to_string()),
            ..FieldAttrs::named("user_id")
        };
        let orders_doc = RowsetDoc {
            fields: vec![FieldAttrs::named("id"), user_id],
            rows: vec![vec![10.into(), 1.into()]],
            ..Default::default()
        };
        let orders = Arc::new(RwLock::new(Nav::from_doc(
            NavConfig::default().with_name("orders"),
            orders_doc,
        )));
        Nav::bind(&orders, &registry);

        let orders = orders.read();
        let row = orders.row_id(0).unwrap();
        assert_eq!(orders.cell_display_val(row, "user_id"), "Ann");
    }
}
