//! Per-kind request handling: canonical keys, cache lookups and coalescing.

use tracing::{debug, warn};

use super::{LoadCallback, LoadState, LoadableEntry, LoadableId, LoadableKind, Loadables};
use crate::engine::Services;
use crate::error::{StowageError, StowageResult};
use crate::manifest::{Catalog, normalize_path};

/// Kinds in teardown order: owners before what they own.
const TEARDOWN_ORDER: [LoadableKind; 6] = [
    LoadableKind::Instance,
    LoadableKind::Scene,
    LoadableKind::Asset,
    LoadableKind::RawFile,
    LoadableKind::Dependency,
    LoadableKind::Bundle,
];

impl Loadables {
    /// Find or create the loadable for `address`, retain it once and make
    /// sure it is loading.
    ///
    /// A cached key never issues a second load: the callback is attached to
    /// the existing entry. Entries that already finished deliver the callback
    /// on the next tick; failed entries restart with a fresh task.
    pub fn request(
        &mut self,
        kind: LoadableKind,
        address: &str,
        callback: Option<LoadCallback>,
        services: &mut Services,
    ) -> StowageResult<LoadableId> {
        let key = match self.canonical_key(kind, address, &services.catalog) {
            Ok(key) => key,
            Err(error) => {
                warn!(%kind, address, %error, "load request rejected");
                return Err(error);
            }
        };

        let id = match self.lookup(kind, &key) {
            Some(id) => {
                self.restart_if_failed(id, services)?;
                id
            }
            None => {
                let task = match self.handlers[kind.index()].factory.create(&key, services) {
                    Ok(task) => task,
                    Err(error) => {
                        warn!(%kind, %key, %error, "loadable factory failed");
                        return Err(error);
                    }
                };
                let id = LoadableId(self.entries.push(LoadableEntry::new(kind, key.clone(), task)));
                debug!(%kind, %key, "loadable created");
                self.handlers[kind.index()].cache.insert(key, id);
                id
            }
        };

        let entry = self.entries.get_mut(id.0);
        entry.reference.retain();
        if let Some(callback) = callback {
            entry.callbacks.push(callback);
        }
        self.load(id);
        Ok(id)
    }

    /// Start loading `id` if it is not loaded yet. Idempotent.
    pub fn load(&mut self, id: LoadableId) {
        let Some(entry) = self.entries.try_get_mut(id.0) else {
            return;
        };
        match entry.state {
            LoadState::Unloaded => {
                entry.state = LoadState::Loading;
                entry.progress = 0.0;
                entry.error = None;
                entry.load_count += 1;
                debug!(kind = %entry.kind, key = %entry.key, "load issued");
            }
            LoadState::Loading => {}
            LoadState::Loaded | LoadState::Failed => {
                if entry.callbacks.is_empty() {
                    return;
                }
            }
        }
        if !entry.in_loading {
            entry.in_loading = true;
            self.loading.push(id);
        }
    }

    /// Detach `key` from its cache. The entry itself lives on until evicted.
    pub fn remove_cache(&mut self, kind: LoadableKind, key: &str) -> Option<LoadableId> {
        self.handlers[kind.index()].cache.remove(&normalize_path(key))
    }

    /// Force every entry of `kind` to release and unload now.
    pub fn clear_cache(&mut self, kind: LoadableKind, services: &mut Services) {
        let ids: Vec<LoadableId> = self.handlers[kind.index()]
            .cache
            .drain()
            .map(|(_, id)| id)
            .collect();
        if !ids.is_empty() {
            debug!(%kind, entries = ids.len(), "clearing cache");
        }
        for id in ids {
            self.force_unload(id, services);
        }
    }

    /// Clear every cache, owners first, then anything detached from its cache.
    pub fn clear_all(&mut self, services: &mut Services) {
        for kind in TEARDOWN_ORDER {
            self.clear_cache(kind, services);
        }
        let rest: Vec<LoadableId> = self.entries.iter_slots().map(LoadableId).collect();
        for id in rest {
            self.force_unload(id, services);
        }
    }

    fn force_unload(&mut self, id: LoadableId, services: &mut Services) {
        if let Some(entry) = self.entries.try_get_mut(id.0) {
            entry.reference.fully_release();
            self.unload(id, services);
        }
    }

    fn restart_if_failed(&mut self, id: LoadableId, services: &Services) -> StowageResult<()> {
        let entry = self.entries.get_mut(id.0);
        if entry.state != LoadState::Failed {
            return Ok(());
        }
        let task = self.handlers[entry.kind.index()]
            .factory
            .create(&entry.key, services)?;
        debug!(kind = %entry.kind, key = %entry.key, "restarting failed loadable");
        entry.task = Some(task);
        entry.state = LoadState::Unloaded;
        entry.error = None;
        Ok(())
    }

    fn canonical_key(
        &mut self,
        kind: LoadableKind,
        address: &str,
        catalog: &Catalog,
    ) -> StowageResult<String> {
        let address = normalize_path(address);
        let key = match kind {
            LoadableKind::Bundle => catalog
                .bundle(&address)
                .or_else(|| catalog.bundle_by_save_name(&address))
                .filter(|bundle| !bundle.raw_file)
                .map(|bundle| bundle.save_name()),
            LoadableKind::Dependency => catalog
                .bundle(&address)
                .filter(|bundle| !bundle.raw_file)
                .map(|bundle| bundle.name.clone()),
            LoadableKind::Asset => catalog.bundle_for_asset(&address).map(|_| address.clone()),
            LoadableKind::Scene => catalog.bundle_for_scene(&address).map(|_| address.clone()),
            LoadableKind::RawFile => catalog
                .bundle(&address)
                .filter(|bundle| bundle.raw_file)
                .map(|bundle| bundle.name.clone()),
            LoadableKind::Instance => catalog.bundle_for_asset(&address).map(|_| {
                self.instance_counter += 1;
                format!("{}#{}", address, self.instance_counter)
            }),
        };
        key.ok_or(StowageError::NotFound { kind, address })
    }
}
