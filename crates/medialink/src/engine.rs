// Engine instances

use crate::error::{Error, Result};
use crate::event::{LogEntry, Payload};
use crate::handle::{InstanceKind, NativeHandle};
use crate::relay::{relay_log, EventRelay, NativeListener, SubscriptionId};
use medialink_engine::{abi, Instance};
use parking_lot::Mutex;
use std::ffi::CString;
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::Arc;

/// One engine instance with its own event dispatcher.
///
/// Media and players created from an engine hold their own native
/// reference to it, so they keep working after the engine is disposed;
/// creating new ones does not.
pub struct Engine {
    handle: NativeHandle<InstanceKind>,
    relay: Arc<EventRelay>,
    log_listener: Mutex<Option<Box<NativeListener>>>,
}

impl Engine {
    /// Start an engine with startup options such as `--no-audio` or `--rate=4`
    pub fn new(options: &[&str]) -> Result<Self> {
        crate::init_logging();

        let args = options
            .iter()
            .map(|option| {
                CString::new(*option).map_err(|_| Error::Argument(format!("option {:?} contains a NUL byte", option)))
            })
            .collect::<Result<Vec<_>>>()?;
        let argv: Vec<*const c_char> = args.iter().map(|arg| arg.as_ptr()).collect();
        let argc = c_int::try_from(argv.len()).map_err(|_| Error::Argument("too many options".to_string()))?;

        // SAFETY: argv holds argc valid C strings that outlive the call.
        let raw = unsafe { abi::mle_instance_new(argc, argv.as_ptr()) };
        if raw.is_null() {
            return Err(Error::EngineInit(format!("engine rejected options {:?}", options)));
        }
        // SAFETY: a fresh instance reference handed to us.
        let handle = unsafe { NativeHandle::acquire(raw) }?;
        let relay = EventRelay::new()?;

        let listener = relay.listener(handle.id());
        let opaque = listener.as_opaque();
        // SAFETY: the listener stays boxed until the callback is cleared in `dispose`.
        handle.with_ptr(|raw| unsafe { abi::mle_instance_set_log(raw, Some(relay_log), opaque) })?;

        log::info!("Engine {} started with {:?}", handle.id(), options);
        Ok(Self {
            handle,
            relay,
            log_listener: Mutex::new(Some(listener)),
        })
    }

    /// Receive engine log messages up to the `--verbose` level.
    /// Fails with `InvalidHandle` once the engine is disposed.
    pub fn subscribe_log(&self, callback: impl Fn(&LogEntry) + Send + Sync + 'static) -> Result<SubscriptionId> {
        self.handle.with_ptr(|_| {
            self.relay.subscribe(self.handle.id(), move |payload| {
                if let Payload::Log(entry) = payload {
                    callback(entry);
                }
            })
        })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.relay.unsubscribe(id)
    }

    /// Release the engine. Log subscribers receive nothing afterwards.
    pub fn dispose(&self) {
        if !self.handle.is_valid() {
            return;
        }
        if let Some(listener) = self.log_listener.lock().take() {
            // SAFETY: clearing waits for a running log callback, after which
            // the listener is no longer referenced.
            let _ = self
                .handle
                .with_ptr(|raw| unsafe { abi::mle_instance_set_log(raw, None, ptr::null_mut()) });
            drop(listener);
        }
        self.handle.release();
        self.relay.forget_source(self.handle.id());
        log::info!("Engine {} disposed", self.handle.id());
    }

    pub fn is_disposed(&self) -> bool {
        !self.handle.is_valid()
    }

    /// A new native reference for objects created from this engine
    pub(crate) fn instance(&self) -> Result<NativeHandle<InstanceKind>> {
        self.handle
            .duplicate()
            .map_err(|_| Error::Argument("engine is disposed".to_string()))
    }

    pub(crate) fn relay(&self) -> &Arc<EventRelay> {
        &self.relay
    }

    pub fn native_reference(&self) -> *mut Instance {
        self.handle.as_ptr()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use medialink_engine::LogLevel;
    use std::time::Duration;

    #[test]
    fn test_engine_forwards_log_entries() {
        let engine = Engine::new(&["--verbose=3", "-sout-all"]).unwrap();
        let (tx, rx) = unbounded();
        engine
            .subscribe_log(move |entry| {
                let _ = tx.send(entry.clone());
            })
            .unwrap();

        // Creating a player logs at debug level.
        let instance = engine.instance().unwrap();
        let player = instance.with_ptr(|raw| unsafe { abi::mle_player_new(raw) }).unwrap();
        unsafe { abi::mle_player_release(player) };

        let entry = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(entry.level, LogLevel::Debug);
        assert_eq!(entry.module, "player");
    }

    #[test]
    fn test_disposed_engine_rejects_new_objects() {
        let engine = Engine::new(&[]).unwrap();
        assert!(!engine.native_reference().is_null());
        engine.dispose();
        engine.dispose();
        assert!(engine.is_disposed());
        assert!(engine.native_reference().is_null());
        assert!(matches!(engine.instance(), Err(Error::Argument(_))));
        assert!(matches!(engine.subscribe_log(|_| {}), Err(Error::InvalidHandle)));
    }

    #[test]
    fn test_nul_in_option_is_rejected() {
        assert!(matches!(Engine::new(&["--bad\0"]), Err(Error::Argument(_))));
    }
}
