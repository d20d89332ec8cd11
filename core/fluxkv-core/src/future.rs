//! FluxFuture: single-assignment handles to engine results.
//!
//! Every asynchronous engine call hands back a [`FluxFuture`] whose matching
//! [`Promise`] is completed out of band, usually on the network thread.
//!
//! # Guarantees
//!
//! - A future resolves at most once: a value, an error, `Cancelled`, or
//!   `BrokenPromise` when its promise is dropped unsent. It never stays
//!   pending once its producer is gone.
//! - `get`/`.await` consume the future, so a result is observed exactly once.
//! - Dropping a pending future releases the slot and runs the producer's
//!   cancel hook; a later `send` is discarded.
//!
//! ```rust
//! use fluxkv_core::future::promise;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> fluxkv_core::FluxResult<()> {
//! let (tx, rx) = promise::<u32>();
//! std::thread::spawn(move || tx.send(Ok(7)));
//! assert_eq!(rx.get().await?, 7);
//! # Ok(())
//! # }
//! ```

use crate::error::{FluxError, FluxResult};
use parking_lot::Mutex;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

type Continuation<T> = Box<dyn FnOnce(FluxResult<T>) + Send>;
type CancelHook = Box<dyn FnOnce() + Send>;

enum Slot<T> {
    Pending {
        waker: Option<Waker>,
        continuation: Option<Continuation<T>>,
        on_cancel: Option<CancelHook>,
    },
    Ready(FluxResult<T>),
    /// Result taken by its consumer, or the consumer went away.
    Released,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
}

impl<T> Shared<T> {
    fn pending() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending {
                waker: None,
                continuation: None,
                on_cancel: None,
            }),
        }
    }

    fn resolved(result: FluxResult<T>) -> Self {
        Self {
            slot: Mutex::new(Slot::Ready(result)),
        }
    }

    fn is_pending(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Pending { .. })
    }

    /// Single assignment. Returns false when the slot was already settled.
    fn resolve(&self, result: FluxResult<T>) -> bool {
        let mut slot = self.slot.lock();
        match mem::replace(&mut *slot, Slot::Released) {
            Slot::Pending {
                waker,
                continuation,
                on_cancel,
            } => {
                match continuation {
                    Some(continuation) => {
                        drop(slot);
                        continuation(result);
                    }
                    None => {
                        *slot = Slot::Ready(result);
                        drop(slot);
                        if let Some(waker) = waker {
                            waker.wake();
                        }
                    }
                }
                drop(on_cancel);
                true
            }
            settled => {
                *slot = settled;
                false
            }
        }
    }

    fn cancel(&self) {
        let hook = {
            let mut slot = self.slot.lock();
            match &mut *slot {
                Slot::Pending { on_cancel, .. } => on_cancel.take(),
                _ => return,
            }
        };
        self.resolve(Err(FluxError::Cancelled));
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Consumer side went away.
    fn release(&self) {
        let mut slot = self.slot.lock();
        let hook = match &mut *slot {
            // A continuation owns the result now.
            Slot::Pending {
                continuation: Some(_),
                ..
            } => return,
            Slot::Pending { on_cancel, .. } => on_cancel.take(),
            _ => None,
        };
        let previous = mem::replace(&mut *slot, Slot::Released);
        drop(slot);
        drop(previous);
        if let Some(hook) = hook {
            hook();
        }
    }

    fn set_cancel_hook(&self, hook: CancelHook) {
        let mut slot = self.slot.lock();
        if let Slot::Pending { on_cancel, .. } = &mut *slot {
            *on_cancel = Some(hook);
        }
    }
}

trait Cancellable: Send + Sync {
    fn cancel(&self);
    fn is_pending(&self) -> bool;
}

impl<T: Send + 'static> Cancellable for Shared<T> {
    fn cancel(&self) {
        Shared::cancel(self)
    }

    fn is_pending(&self) -> bool {
        Shared::is_pending(self)
    }
}

/// Create a connected promise/future pair.
pub fn promise<T: Send + 'static>() -> (Promise<T>, FluxFuture<T>) {
    let shared = Arc::new(Shared::pending());
    (
        Promise {
            shared: Some(Arc::clone(&shared)),
        },
        FluxFuture { shared },
    )
}

/// Producer side of a [`FluxFuture`].
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T: Send + 'static> Promise<T> {
    /// Resolve the future. Discarded if it was cancelled or dropped.
    pub fn send(mut self, result: FluxResult<T>) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(result);
        }
    }

    /// True once nobody can observe the result any more.
    pub fn is_cancelled(&self) -> bool {
        self.shared.as_ref().is_none_or(|shared| !shared.is_pending())
    }

    /// Run `hook` if the consumer cancels or drops the future before it resolves.
    pub fn on_cancel<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(shared) = &self.shared {
            shared.set_cancel_hook(Box::new(hook));
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(Err(FluxError::BrokenPromise));
        }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("sent", &self.shared.is_none())
            .finish()
    }
}

/// Eventual result of one asynchronous engine call.
#[must_use = "futures resolve only when observed; drop it to release the operation"]
pub struct FluxFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> FluxFuture<T> {
    /// An already resolved future.
    pub fn ready(value: T) -> Self {
        Self {
            shared: Arc::new(Shared::resolved(Ok(value))),
        }
    }

    /// An already failed future.
    pub fn failed(error: FluxError) -> Self {
        Self {
            shared: Arc::new(Shared::resolved(Err(error))),
        }
    }

    /// Non-suspending poll.
    pub fn is_ready(&self) -> bool {
        matches!(*self.shared.slot.lock(), Slot::Ready(_))
    }

    /// Best-effort cancellation; a pending future resolves to `Cancelled`.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Wait for the result, consuming the future.
    pub async fn get(self) -> FluxResult<T> {
        self.await
    }

    /// Weak handle that can cancel this future without owning it.
    pub fn cancel_handle(&self) -> CancelHandle {
        let shared: Arc<dyn Cancellable> = self.shared.clone();
        CancelHandle {
            target: Arc::downgrade(&shared),
        }
    }

    /// Continuation: resolve a new future with `f(result)`.
    ///
    /// `f` runs on whichever thread resolves this future, or immediately if it
    /// already has. Cancelling the returned future cancels this one.
    pub fn map<U, F>(self, f: F) -> FluxFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(FluxResult<T>) -> FluxResult<U> + Send + 'static,
    {
        let (promise, mapped) = promise::<U>();
        let source = self.cancel_handle();
        mapped.shared.set_cancel_hook(Box::new(move || source.cancel()));

        let mut slot = self.shared.slot.lock();
        match mem::replace(&mut *slot, Slot::Released) {
            Slot::Pending {
                waker, on_cancel, ..
            } => {
                *slot = Slot::Pending {
                    waker,
                    continuation: Some(Box::new(move |result| promise.send(f(result)))),
                    on_cancel,
                };
            }
            Slot::Ready(result) => {
                drop(slot);
                promise.send(f(result));
            }
            Slot::Released => {
                drop(slot);
                promise.send(Err(FluxError::FutureReleased));
            }
        }
        mapped
    }
}

impl<T> Future for FluxFuture<T> {
    type Output = FluxResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock();
        match mem::replace(&mut *slot, Slot::Released) {
            Slot::Pending {
                waker,
                continuation,
                on_cancel,
            } => {
                let waker = match waker {
                    Some(waker) if waker.will_wake(cx.waker()) => waker,
                    _ => cx.waker().clone(),
                };
                *slot = Slot::Pending {
                    waker: Some(waker),
                    continuation,
                    on_cancel,
                };
                Poll::Pending
            }
            Slot::Ready(result) => Poll::Ready(result),
            Slot::Released => Poll::Ready(Err(FluxError::FutureReleased)),
        }
    }
}

impl<T> Drop for FluxFuture<T> {
    fn drop(&mut self) {
        self.shared.release();
    }
}

impl<T> std::fmt::Debug for FluxFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.shared.slot.lock() {
            Slot::Pending { .. } => "pending",
            Slot::Ready(Ok(_)) => "ready",
            Slot::Ready(Err(_)) => "failed",
            Slot::Released => "released",
        };
        f.debug_struct("FluxFuture").field("state", &state).finish()
    }
}

/// Type-erased, non-owning handle used to cancel in-flight futures.
#[derive(Clone)]
pub struct CancelHandle {
    target: Weak<dyn Cancellable>,
}

impl CancelHandle {
    /// Cancel the target if it is still pending.
    pub fn cancel(&self) {
        if let Some(target) = self.target.upgrade() {
            target.cancel();
        }
    }

    /// False once the target resolved or was dropped.
    pub fn is_pending(&self) -> bool {
        self.target
            .upgrade()
            .is_some_and(|target| target.is_pending())
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("pending", &self.is_pending())
            .finish()
    }
}
