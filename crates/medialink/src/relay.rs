// Delivery of engine callbacks to Rust subscribers
//
// Engine threads only push onto an unbounded channel; one dispatcher thread
// per engine drains it and calls subscribers. Delivery of each event holds a
// (reentrant) delivery lock, and removing subscribers takes the same lock, so
// once `forget_source` or `unsubscribe` returns nothing more is delivered to
// the removed subscribers. Being reentrant, the lock lets a subscriber
// dispose its own source from inside the callback.

use crate::error::Result;
use crate::event::{LogEntry, Payload};
use crate::ffi::{borrow_string, guard};
use crate::handle::HandleId;
use crossbeam_channel::{unbounded, Receiver, Sender};
use medialink_engine::{LogLevel, RawEvent};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::os::raw::{c_char, c_int, c_void};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Minimum spacing of `TimeChanged` deliveries to one subscriber
pub const TIME_THROTTLE: Duration = Duration::from_millis(100);

static NEXT_SUBSCRIPTION_ID: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(1));

/// Returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn Fn(&Payload) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    active: AtomicBool,
    callback: Callback,
    last_time_event: Mutex<Option<Instant>>,
}

impl Subscriber {
    fn deliver(&self, payload: &Payload) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        if payload.is_time_changed() {
            let mut last = self.last_time_event.lock();
            if last.is_some_and(|at| at.elapsed() < TIME_THROTTLE) {
                return;
            }
            *last = Some(Instant::now());
        }
        guard((), || (self.callback)(payload));
    }
}

enum Message {
    Deliver { source: HandleId, payload: Payload },
    Shutdown,
}

#[derive(Default)]
struct Registry {
    subscribers: RwLock<HashMap<HandleId, Vec<Arc<Subscriber>>>>,
    delivery: ReentrantMutex<()>,
}

impl Registry {
    fn deliver(&self, source: HandleId, payload: &Payload) {
        let _delivery = self.delivery.lock();
        let subscribers = self.subscribers.read().get(&source).cloned();
        match subscribers {
            Some(subscribers) => {
                for subscriber in subscribers {
                    subscriber.deliver(payload);
                }
            }
            None => log::trace!("Dropping {:?} for detached source {}", payload, source),
        }
    }
}

pub(crate) struct EventRelay {
    registry: Arc<Registry>,
    tx: Sender<Message>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    dispatcher_thread: ThreadId,
}

impl EventRelay {
    pub(crate) fn new() -> Result<Arc<Self>> {
        let registry = Arc::new(Registry::default());
        let (tx, rx) = unbounded();

        let thread_registry = Arc::clone(&registry);
        let dispatcher = thread::Builder::new()
            .name("medialink-relay".to_string())
            .spawn(move || dispatch(thread_registry, rx))?;
        let dispatcher_thread = dispatcher.thread().id();

        Ok(Arc::new(Self {
            registry,
            tx,
            dispatcher: Mutex::new(Some(dispatcher)),
            dispatcher_thread,
        }))
    }

    pub(crate) fn subscribe(&self, source: HandleId, callback: impl Fn(&Payload) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed));
        let subscriber = Arc::new(Subscriber {
            id,
            active: AtomicBool::new(true),
            callback: Box::new(callback),
            last_time_event: Mutex::new(None),
        });
        self.registry
            .subscribers
            .write()
            .entry(source)
            .or_default()
            .push(subscriber);
        log::debug!("Subscription {:?} added for {}", id, source);
        id
    }

    /// Remove one subscriber. Returns false if it was not registered.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let _delivery = self.registry.delivery.lock();
        let mut subscribers = self.registry.subscribers.write();
        for list in subscribers.values_mut() {
            if let Some(index) = list.iter().position(|s| s.id == id) {
                let removed = list.remove(index);
                removed.active.store(false, Ordering::Release);
                return true;
            }
        }
        false
    }

    /// Drop every subscriber of `source`; events still queued for it are discarded
    pub(crate) fn forget_source(&self, source: HandleId) {
        let _delivery = self.registry.delivery.lock();
        if let Some(list) = self.registry.subscribers.write().remove(&source) {
            for subscriber in &list {
                subscriber.active.store(false, Ordering::Release);
            }
            log::debug!("Forgot {} subscriber(s) of {}", list.len(), source);
        }
    }

    pub(crate) fn subscriber_count(&self, source: HandleId) -> usize {
        self.registry.subscribers.read().get(&source).map_or(0, Vec::len)
    }

    /// Listener state for the engine callbacks of `source`
    pub(crate) fn listener(&self, source: HandleId) -> Box<NativeListener> {
        Box::new(NativeListener {
            source,
            tx: self.tx.clone(),
        })
    }

    /// Stop the dispatcher. Queued events are discarded.
    pub(crate) fn shutdown(&self) {
        let Some(dispatcher) = self.dispatcher.lock().take() else {
            return;
        };
        {
            let _delivery = self.registry.delivery.lock();
            self.registry.subscribers.write().clear();
        }
        let _ = self.tx.send(Message::Shutdown);
        if thread::current().id() == self.dispatcher_thread {
            log::debug!("Relay shut down from its own dispatcher; not joining");
            return;
        }
        if dispatcher.join().is_err() {
            log::error!("Relay dispatcher panicked");
        }
    }
}

impl Drop for EventRelay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch(registry: Arc<Registry>, rx: Receiver<Message>) {
    log::debug!("Relay dispatcher started");
    for message in rx.iter() {
        match message {
            Message::Deliver { source, payload } => registry.deliver(source, &payload),
            Message::Shutdown => break,
        }
    }
    log::debug!("Relay dispatcher stopped");
}

/// User data behind the engine callbacks registered for one source
pub(crate) struct NativeListener {
    source: HandleId,
    tx: Sender<Message>,
}

impl NativeListener {
    pub(crate) fn as_opaque(&self) -> *mut c_void {
        self as *const NativeListener as *mut c_void
    }

    fn push(&self, payload: Payload) {
        let source = self.source;
        if self.tx.send(Message::Deliver { source, payload }).is_err() {
            log::trace!("Relay closed; event for {} dropped", source);
        }
    }
}

/// Engine event callback: queue and return
///
/// # Safety
/// `opaque` must be a live `NativeListener` for as long as it is attached.
pub(crate) unsafe extern "C" fn relay_event(event: *const RawEvent, opaque: *mut c_void) {
    guard((), || {
        let (Some(event), Some(listener)) = (event.as_ref(), (opaque as *const NativeListener).as_ref()) else {
            return;
        };
        match Payload::from_raw(event) {
            Some(payload) => listener.push(payload),
            None => log::warn!("Undecodable engine event {:?}", event),
        }
    })
}

/// Engine log callback: queue and return
///
/// # Safety
/// `opaque` must be a live `NativeListener` while installed; strings are
/// valid for the duration of the call.
pub(crate) unsafe extern "C" fn relay_log(
    opaque: *mut c_void,
    level: c_int,
    module: *const c_char,
    message: *const c_char,
) {
    guard((), || {
        let Some(listener) = (opaque as *const NativeListener).as_ref() else {
            return;
        };
        listener.push(Payload::Log(LogEntry {
            level: LogLevel::from_raw(level).unwrap_or(LogLevel::Debug),
            module: borrow_string(module),
            message: borrow_string(message),
        }));
    })
}
