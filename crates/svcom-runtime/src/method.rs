use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use svcom_payload::Payload;

use crate::client::ClientMessage;
use crate::credentials::PosixCredentials;
use crate::dispatch::{CallbackCell, DispatchSender};
use crate::error::ConnectorError;

/// Index of a method within a service interface.
pub type MethodId = u16;

/// Outcome of a method call as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodResult {
    /// The method returned normally.
    Return(Payload),
    /// The method failed with an application defined code.
    ApplicationError { code: i32, payload: Payload },
    /// The call did not reach the application or was refused.
    Failed(ConnectorError),
}

impl MethodResult {
    pub fn is_return(&self) -> bool {
        matches!(self, MethodResult::Return(_))
    }
}

/// Callback receiving the reply of a method call.
pub type ReplyCallback = Box<dyn FnOnce(MethodResult) + Send>;

/// Bookkeeping for one outstanding call, shared by the caller's
/// [`MethodInvocation`] and the provider's [`MethodReply`].
pub(crate) struct CallState {
    reply: CallbackCell<ReplyCallback>,
    outcome: Mutex<Outcome>,
    provider_invocation: Mutex<Option<MethodInvocation>>,
    client: DispatchSender<ClientMessage>,
}

enum Outcome {
    Pending,
    Ready(MethodResult),
    Taken,
}

impl CallState {
    pub fn new(reply: ReplyCallback, client: DispatchSender<ClientMessage>) -> Arc<Self> {
        Arc::new(Self {
            reply: CallbackCell::new(reply),
            outcome: Mutex::new(Outcome::Pending),
            provider_invocation: Mutex::new(None),
            client,
        })
    }

    /// Record the result and queue its delivery. Only the first result counts.
    pub fn complete(self: &Arc<Self>, result: MethodResult) {
        {
            let mut outcome = self.outcome.lock();
            if !matches!(*outcome, Outcome::Pending) {
                return;
            }
            *outcome = Outcome::Ready(result);
        }
        if !self.client.send(ClientMessage::MethodReply(self.clone())) {
            self.abandon();
        }
    }

    /// Run the reply callback. Called on the client's dispatcher.
    pub fn deliver(&self) {
        let result = {
            let mut outcome = self.outcome.lock();
            match std::mem::replace(&mut *outcome, Outcome::Taken) {
                Outcome::Ready(result) => result,
                other => {
                    *outcome = other;
                    return;
                }
            }
        };
        self.reply.invoke_once(|callback| callback(result));
        self.release_provider_invocation();
    }

    /// Keep the provider's handle alive until the call is answered or cancelled.
    pub fn attach_provider_invocation(&self, invocation: MethodInvocation) {
        let answered = !matches!(*self.outcome.lock(), Outcome::Pending);
        if answered || self.reply.is_cancelled() {
            drop(invocation);
            return;
        }
        let previous = self.provider_invocation.lock().replace(invocation);
        drop(previous);
        if self.reply.is_cancelled() {
            self.release_provider_invocation();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.reply.is_cancelled()
    }

    /// Cancel from the caller side; waits for a reply that is being delivered.
    pub fn cancel(&self) {
        self.reply.cancel();
        *self.outcome.lock() = Outcome::Taken;
        self.release_provider_invocation();
    }

    /// Drop the reply callback without calling it.
    pub fn abandon(&self) {
        self.cancel();
    }

    fn release_provider_invocation(&self) {
        let invocation = self.provider_invocation.lock().take();
        drop(invocation);
    }
}

enum InvocationInner {
    Call(Arc<CallState>),
    Guard(#[allow(dead_code)] Box<dyn Send>),
    Detached,
}

/// A live method call. Dropping it cancels the call: the reply callback is
/// never invoked afterwards.
///
/// Providers return one from `on_method_call` to represent work in
/// progress; it is dropped when the caller cancels or the reply is delivered.
pub struct MethodInvocation {
    inner: InvocationInner,
}

impl MethodInvocation {
    pub(crate) fn for_call(call: Arc<CallState>) -> Self {
        Self {
            inner: InvocationInner::Call(call),
        }
    }

    /// An invocation handle that owns nothing.
    pub fn detached() -> Self {
        Self {
            inner: InvocationInner::Detached,
        }
    }

    /// An invocation handle that drops `guard` when the call ends.
    pub fn from_guard<G: Send + 'static>(guard: G) -> Self {
        Self {
            inner: InvocationInner::Guard(Box::new(guard)),
        }
    }
}

impl Drop for MethodInvocation {
    fn drop(&mut self) {
        if let InvocationInner::Call(call) = &self.inner {
            call.cancel();
        }
    }
}

impl fmt::Debug for MethodInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner {
            InvocationInner::Call(_) => "call",
            InvocationInner::Guard(_) => "guard",
            InvocationInner::Detached => "detached",
        };
        f.debug_struct("MethodInvocation").field("kind", &kind).finish()
    }
}

/// One-shot reply channel handed to the provider.
///
/// Dropping it without replying answers the call with
/// [`ConnectorError::RequestRejected`].
pub struct MethodReply {
    call: Option<Arc<CallState>>,
}

impl MethodReply {
    pub(crate) fn new(call: Arc<CallState>) -> Self {
        Self { call: Some(call) }
    }

    pub fn send(mut self, result: MethodResult) {
        if let Some(call) = self.call.take() {
            call.complete(result);
        }
    }

    pub fn reply(self, payload: Payload) {
        self.send(MethodResult::Return(payload));
    }

    pub fn error(self, code: i32, payload: Payload) {
        self.send(MethodResult::ApplicationError { code, payload });
    }

    pub fn fail(self, error: ConnectorError) {
        self.send(MethodResult::Failed(error));
    }

    /// True once the caller dropped its invocation handle.
    pub fn is_cancelled(&self) -> bool {
        self.call.as_ref().is_none_or(|call| call.is_cancelled())
    }
}

impl Drop for MethodReply {
    fn drop(&mut self) {
        if let Some(call) = self.call.take() {
            call.complete(MethodResult::Failed(ConnectorError::RequestRejected));
        }
    }
}

impl fmt::Debug for MethodReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodReply")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// An inbound call as seen by the provider.
#[derive(Debug)]
pub struct MethodCall {
    pub method_id: MethodId,
    pub payload: Payload,
    pub reply: MethodReply,
    /// Credentials of the calling client.
    pub credentials: PosixCredentials,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn drain(queue: &dispatch::DispatchQueue<ClientMessage>) {
        while let Some(message) = queue.try_next() {
            if let ClientMessage::MethodReply(call) = message {
                call.deliver();
            }
        }
    }

    #[test]
    fn reply_is_delivered_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (sender, queue) = dispatch::queue::<ClientMessage>();
        let seen = counter.clone();
        let call = CallState::new(
            Box::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
            sender,
        );
        let reply = MethodReply::new(call.clone());
        let second = MethodReply::new(call.clone());
        reply.reply(Payload::from("ok"));
        second.fail(ConnectorError::MalformedPayload);

        drain(&queue);
        drain(&queue);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_reply_rejects() {
        let (sender, _queue) = dispatch::queue::<ClientMessage>();
        let result = Arc::new(Mutex::new(None));
        let sink = result.clone();
        let call = CallState::new(Box::new(move |r: MethodResult| *sink.lock() = Some(r)), sender);
        drop(MethodReply::new(call.clone()));

        call.deliver();
        assert_eq!(
            *result.lock(),
            Some(MethodResult::Failed(ConnectorError::RequestRejected))
        );
    }

    #[test]
    fn cancelled_call_never_delivers() {
        let (sender, _queue) = dispatch::queue::<ClientMessage>();
        let call = CallState::new(
            Box::new(|_| panic!("cancelled reply should not run")),
            sender,
        );
        let invocation = MethodInvocation::for_call(call.clone());
        let reply = MethodReply::new(call.clone());
        drop(invocation);
        assert!(reply.is_cancelled());
        reply.reply(Payload::empty().clone());
        call.deliver();
    }

    #[test]
    fn provider_guard_is_dropped_on_cancel() {
        let (sender, _queue) = dispatch::queue::<ClientMessage>();
        let call = CallState::new(Box::new(|_| ()), sender);
        let dropped = Arc::new(AtomicUsize::new(0));

        struct Guard(Arc<AtomicUsize>);
        impl Drop for Guard {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        call.attach_provider_invocation(MethodInvocation::from_guard(Guard(dropped.clone())));
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        drop(MethodInvocation::for_call(call));
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }
}
