use std::fmt;
use std::sync::Arc;

use crate::dispatch::CallbackCell;
use crate::runtime::RuntimeInner;
use crate::service::{ServiceInstance, ServiceInterface};

/// Whether a service appeared or went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FindResultStatus {
    Added,
    Deleted,
}

pub(crate) trait FindHandler: Send {
    fn on_change(
        &mut self,
        interface: &ServiceInterface,
        instance: &ServiceInstance,
        status: FindResultStatus,
    );

    /// Called once after the services known at subscription time were reported.
    fn on_initial_results(&mut self) {}
}

pub(crate) struct ChangeHandler<F>(pub F);

impl<F> FindHandler for ChangeHandler<F>
where
    F: FnMut(&ServiceInterface, &ServiceInstance, FindResultStatus) + Send,
{
    fn on_change(
        &mut self,
        interface: &ServiceInterface,
        instance: &ServiceInstance,
        status: FindResultStatus,
    ) {
        (self.0)(interface, instance, status)
    }
}

/// Folds incremental changes into the full list of matching instances.
pub(crate) struct AggregateHandler<F> {
    instances: Vec<ServiceInstance>,
    reported: bool,
    callback: F,
}

impl<F> AggregateHandler<F> {
    pub fn new(callback: F) -> Self {
        Self {
            instances: Vec::new(),
            reported: false,
            callback,
        }
    }
}

impl<F> FindHandler for AggregateHandler<F>
where
    F: FnMut(&[ServiceInstance]) + Send,
{
    fn on_change(
        &mut self,
        _interface: &ServiceInterface,
        instance: &ServiceInstance,
        status: FindResultStatus,
    ) {
        let changed = match status {
            FindResultStatus::Added if !self.instances.contains(instance) => {
                self.instances.push(instance.clone());
                true
            }
            FindResultStatus::Deleted => match self.instances.iter().position(|i| i == instance) {
                Some(index) => {
                    self.instances.remove(index);
                    true
                }
                None => false,
            },
            FindResultStatus::Added => false,
        };
        if changed && self.reported {
            (self.callback)(&self.instances);
        }
    }

    fn on_initial_results(&mut self) {
        self.reported = true;
        (self.callback)(&self.instances);
    }
}

pub(crate) type FindSlot = CallbackCell<Box<dyn FindHandler>>;

pub(crate) enum DiscoveryMessage {
    Changed {
        slot: Arc<FindSlot>,
        interface: ServiceInterface,
        instance: ServiceInstance,
        status: FindResultStatus,
    },
    InitialResults {
        slot: Arc<FindSlot>,
    },
}

pub(crate) fn deliver(message: DiscoveryMessage) {
    match message {
        DiscoveryMessage::Changed {
            slot,
            interface,
            instance,
            status,
        } => {
            slot.invoke(|handler| handler.on_change(&interface, &instance, status));
        }
        DiscoveryMessage::InitialResults { slot } => {
            slot.invoke(|handler| handler.on_initial_results());
        }
    }
}

enum FindInner {
    Local {
        runtime: Arc<RuntimeInner>,
        id: u64,
        slot: Arc<FindSlot>,
    },
    Guard(#[allow(dead_code)] Box<dyn Send>),
    Empty,
}

/// A discovery subscription. Dropping it cancels the subscription; once the
/// drop returns no callback runs any more.
pub struct FindSubscription {
    inner: FindInner,
}

impl FindSubscription {
    pub(crate) fn local(runtime: Arc<RuntimeInner>, id: u64, slot: Arc<FindSlot>) -> Self {
        Self {
            inner: FindInner::Local { runtime, id, slot },
        }
    }

    /// A subscription handle owned by a bridge; dropping it drops `guard`.
    pub fn from_guard<G: Send + 'static>(guard: G) -> Self {
        Self {
            inner: FindInner::Guard(Box::new(guard)),
        }
    }

    /// A handle that owns nothing.
    pub fn empty() -> Self {
        Self {
            inner: FindInner::Empty,
        }
    }
}

impl Drop for FindSubscription {
    fn drop(&mut self) {
        if let FindInner::Local { runtime, id, slot } = &self.inner {
            slot.cancel();
            runtime.remove_find(*id);
        }
    }
}

impl fmt::Debug for FindSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            FindInner::Local { id, .. } => f.debug_tuple("FindSubscription").field(id).finish(),
            FindInner::Guard(_) => f.write_str("FindSubscription(guard)"),
            FindInner::Empty => f.write_str("FindSubscription(empty)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Version;

    #[test]
    fn aggregate_reports_full_set_after_initial_results() {
        let mut reports: Vec<Vec<String>> = Vec::new();
        {
            let mut handler = AggregateHandler::new(|instances: &[ServiceInstance]| {
                reports.push(instances.iter().map(|i| i.id.clone()).collect());
            });
            let iface = ServiceInterface::new("svc", Version::new(1, 0));
            handler.on_change(&iface, &ServiceInstance::new("a"), FindResultStatus::Added);
            handler.on_initial_results();
            handler.on_change(&iface, &ServiceInstance::new("b"), FindResultStatus::Added);
            handler.on_change(&iface, &ServiceInstance::new("b"), FindResultStatus::Added);
            handler.on_change(&iface, &ServiceInstance::new("a"), FindResultStatus::Deleted);
            handler.on_change(&iface, &ServiceInstance::new("x"), FindResultStatus::Deleted);
        }
        assert_eq!(
            reports,
            vec![
                vec!["a".to_string()],
                vec!["a".to_string(), "b".to_string()],
                vec!["b".to_string()],
            ]
        );
    }
}
