//! Per-tick advancement and eviction of loadables.

use stowage_core::profiling::{profile_function, profile_scope};
use tracing::{debug, trace, warn};

use super::{LoadContext, LoadState, LoadableId, Loadables, Payload, TaskPoll};
use crate::engine::Services;
use crate::event::EngineEvent;

enum Step {
    Pending,
    Done,
}

impl Loadables {
    /// Run the loading pass, then the eviction pass.
    pub fn update(&mut self, services: &mut Services) {
        profile_function!();
        self.update_loading(services);
        self.update_unused(services);
    }

    /// Advance loading entries in submission order until the budget runs out.
    fn update_loading(&mut self, services: &mut Services) {
        profile_scope!("loading_pass");

        let mut index = 0;
        while index < self.loading.len() {
            if services.budget.is_busy() {
                trace!(remaining = self.loading.len() - index, "loading pass out of budget");
                break;
            }
            let id = self.loading[index];
            match self.step(id, services) {
                Step::Pending => index += 1,
                Step::Done => {
                    // The step may have appended dependencies, never reordered.
                    if let Some(position) = self.loading.iter().position(|queued| *queued == id) {
                        self.loading.remove(position);
                    }
                }
            }
        }
    }

    fn step(&mut self, id: LoadableId, services: &mut Services) -> Step {
        let Some(entry) = self.entries.try_get_mut(id.0) else {
            return Step::Done;
        };
        if entry.state.is_terminal() {
            self.complete(id, services, false);
            return Step::Done;
        }
        let Some(mut task) = entry.task.take() else {
            entry.state = LoadState::Failed;
            entry.error = Some("no load task".to_string());
            self.fail_dependencies(id);
            self.complete(id, services, true);
            return Step::Done;
        };

        let poll = {
            let mut cx = LoadContext::new(id, self, services);
            task.update(&mut cx)
        };

        let Some(entry) = self.entries.try_get_mut(id.0) else {
            return Step::Done;
        };
        entry.task = Some(task);
        match poll {
            TaskPoll::Pending(progress) => {
                if !progress.is_nan() {
                    entry.progress = entry.progress.max(progress.clamp(0.0, 1.0));
                }
                Step::Pending
            }
            TaskPoll::Ready(payload) => {
                entry.payload = payload;
                entry.state = LoadState::Loaded;
                entry.progress = 1.0;
                debug!(kind = %entry.kind, key = %entry.key, "loaded");
                self.complete(id, services, true);
                Step::Done
            }
            TaskPoll::Failed(message) => {
                warn!(kind = %entry.kind, key = %entry.key, error = %message, "load failed");
                entry.state = LoadState::Failed;
                entry.progress = 1.0;
                entry.error = Some(message);
                self.fail_dependencies(id);
                self.complete(id, services, true);
                Step::Done
            }
        }
    }

    /// A failed entry holds no dependencies, so a restart can acquire afresh.
    fn fail_dependencies(&mut self, id: LoadableId) {
        let dependencies = match self.entries.try_get_mut(id.0) {
            Some(entry) => std::mem::take(&mut entry.dependencies),
            None => return,
        };
        for dependency in dependencies {
            self.release(dependency);
        }
    }

    /// Fire callbacks of a terminal entry; `transitioned` entries also emit an event.
    fn complete(&mut self, id: LoadableId, services: &mut Services, transitioned: bool) {
        let Some(entry) = self.entries.try_get_mut(id.0) else {
            return;
        };
        entry.in_loading = false;
        let callbacks = std::mem::take(&mut entry.callbacks);
        let outcome = entry.outcome(id);

        if transitioned {
            let event = match &outcome.error {
                Some(error) if outcome.state == LoadState::Failed => EngineEvent::LoadFailed {
                    id,
                    kind: outcome.kind,
                    key: outcome.key.clone(),
                    error: error.clone(),
                },
                _ => EngineEvent::Loaded {
                    id,
                    kind: outcome.kind,
                    key: outcome.key.clone(),
                },
            };
            services.events.push(event);
        }

        for callback in callbacks {
            callback(&outcome);
        }
    }

    /// Evict unused entries unless a scene transition is in flight.
    fn update_unused(&mut self, services: &mut Services) {
        profile_scope!("unused_pass");

        self.transitions.retain(|transition| !transition.is_done());
        if !self.transitions.is_empty() {
            if !self.unused.is_empty() {
                trace!(
                    transitions = self.transitions.len(),
                    pending = self.unused.len(),
                    "eviction deferred by scene transition"
                );
            }
            return;
        }

        let mut index = 0;
        while index < self.unused.len() {
            // An unload may itself start a scene transition.
            if services.budget.is_busy() || self.transition_in_flight() {
                break;
            }
            let id = self.unused[index];
            let Some(entry) = self.entries.try_get_mut(id.0) else {
                self.unused.remove(index);
                continue;
            };
            if !entry.reference.is_unused() {
                trace!(key = %entry.key, "eviction cancelled, loadable in use again");
                entry.in_unused = false;
                self.unused.remove(index);
                continue;
            }
            if entry.state == LoadState::Loading {
                index += 1;
                continue;
            }
            self.unused.remove(index);
            self.unload(id, services);
        }
    }

    /// Unload an entry now and remove it from its cache and every queue.
    pub(super) fn unload(&mut self, id: LoadableId, services: &mut Services) {
        let Some(mut entry) = self.entries.remove(id.0) else {
            return;
        };
        let handler = &mut self.handlers[entry.kind.index()];
        if handler.cache.get(&entry.key) == Some(&id) {
            handler.cache.remove(&entry.key);
        }
        if entry.in_loading {
            self.loading.retain(|queued| *queued != id);
        }
        if entry.in_unused {
            self.unused.retain(|queued| *queued != id);
        }

        // Requests still waiting on an unfinished load get a failed outcome.
        let callbacks = std::mem::take(&mut entry.callbacks);
        if !callbacks.is_empty() {
            let mut outcome = entry.outcome(id);
            if !outcome.state.is_terminal() {
                outcome.state = LoadState::Failed;
                outcome.error = Some("unloaded before completion".to_string());
            }
            for callback in callbacks {
                callback(&outcome);
            }
        }

        let payload = std::mem::replace(&mut entry.payload, Payload::None);
        if let Some(mut task) = entry.task.take() {
            let mut cx = LoadContext::new(id, self, services);
            task.unload(payload, &mut cx);
        }
        for dependency in entry.dependencies.drain(..) {
            self.release(dependency);
        }

        debug!(kind = %entry.kind, key = %entry.key, "unloaded");
        services.events.push(EngineEvent::Unloaded {
            kind: entry.kind,
            key: entry.key,
        });
    }
}
