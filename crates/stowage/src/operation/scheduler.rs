use std::cell::RefCell;
use std::rc::Rc;

use stowage_core::profiling::profile_function;
use tracing::{debug, warn};

use super::{Operation, OperationContext, OperationStatus, deliver};
use crate::engine::Services;

/// Drives submitted operations once per tick.
///
/// Operations are started on the first tick after submission and updated
/// every tick until they reach a terminal state, at which point they are
/// removed and their callbacks fire. The scheduler never interrupts a step:
/// operations poll the shared budget themselves.
#[derive(Default)]
pub struct Scheduler {
    operations: Vec<Rc<RefCell<dyn Operation>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation. An operation can be submitted once, and only
    /// before it has started.
    pub fn submit(&mut self, operation: Rc<RefCell<dyn Operation>>) -> bool {
        {
            let mut op = operation.borrow_mut();
            let name = op.name();
            let core = op.core_mut();
            if core.registered || core.status() != OperationStatus::Init {
                warn!(operation = name, status = ?core.status(), "operation already started");
                return false;
            }
            core.registered = true;
        }
        self.operations.push(operation);
        true
    }

    pub fn tick(&mut self, services: &mut Services) {
        profile_function!();

        let mut index = 0;
        while index < self.operations.len() {
            let operation = self.operations[index].clone();
            let finished = {
                let mut op = operation.borrow_mut();
                let mut cx = OperationContext::new(services);
                if op.core().status() == OperationStatus::Init {
                    op.core_mut().begin();
                    debug!(operation = op.name(), "operation started");
                    op.on_start(&mut cx);
                }
                if op.core().status() == OperationStatus::Processing {
                    op.on_update(&mut cx);
                }
                if op.core().is_done() {
                    debug!(
                        operation = op.name(),
                        status = ?op.core().status(),
                        error = op.core().error(),
                        "operation finished"
                    );
                    true
                } else {
                    false
                }
            };

            if finished {
                self.operations.remove(index);
                deliver(&*operation);
            } else {
                index += 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
