// Engine instance: startup options and the log callback slot

use crate::callback::Opaque;
use crate::options::EngineOptions;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::ffi::CString;
use std::fmt;
use std::os::raw::{c_char, c_int, c_void};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_INSTANCE_ID: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(1));

/// Severity of an engine log message
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Error = 1,
    Warning = 2,
    Notice = 3,
    Debug = 4,
}

impl LogLevel {
    /// Map a `--verbose=N` value to the most verbose level forwarded
    pub fn from_verbosity(level: u8) -> Self {
        match level {
            0 => LogLevel::Error,
            1 => LogLevel::Warning,
            2 => LogLevel::Notice,
            _ => LogLevel::Debug,
        }
    }

    pub fn from_raw(raw: c_int) -> Option<Self> {
        match raw {
            1 => Some(LogLevel::Error),
            2 => Some(LogLevel::Warning),
            3 => Some(LogLevel::Notice),
            4 => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Notice => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        }
    }
}

/// Log callback signature: `level` is a `LogLevel` discriminant, strings are
/// only valid for the duration of the call.
pub type LogCallback = unsafe extern "C" fn(
    opaque: *mut c_void,
    level: c_int,
    module: *const c_char,
    message: *const c_char,
);

struct LogSink {
    callback: LogCallback,
    opaque: Opaque,
}

/// One engine instance
///
/// Media and players keep their instance alive through an `Arc`.
pub struct Instance {
    id: u64,
    options: EngineOptions,
    log_sink: RwLock<Option<LogSink>>,
}

impl Instance {
    pub fn new(options: EngineOptions) -> Self {
        let id = NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed);
        log::info!("Creating engine instance {} with {:?}", id, options);
        Self {
            id,
            options,
            log_sink: RwLock::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Install or clear the log callback.
    ///
    /// Clearing waits for a callback that is currently running to return.
    pub fn set_log_callback(&self, callback: Option<LogCallback>, opaque: *mut c_void) {
        let sink = callback.map(|callback| LogSink {
            callback,
            opaque: Opaque(opaque),
        });
        *self.log_sink.write() = sink;
    }

    /// Log through the `log` facade and forward to the instance callback
    pub fn emit(&self, level: LogLevel, module: &str, args: fmt::Arguments<'_>) {
        let message = fmt::format(args);
        log::log!(level.into(), "[engine {}] {}: {}", self.id, module, message);

        if !self.options.verbosity.is_some_and(|max| level <= max) {
            return;
        }

        let sink = self.log_sink.read();
        if let Some(sink) = sink.as_ref() {
            let module = lossless_cstring(module);
            let message = lossless_cstring(&message);
            // SAFETY: the registrant keeps callback and opaque valid until the
            // sink is replaced, which waits for this read lock.
            unsafe {
                (sink.callback)(
                    sink.opaque.0,
                    level as c_int,
                    module.as_ptr(),
                    message.as_ptr(),
                )
            };
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::info!("Engine instance {} released", self.id);
    }
}

fn lossless_cstring(text: &str) -> CString {
    CString::new(text.replace('\0', "\u{FFFD}")).unwrap_or_default()
}

/// Log through an instance: `emit!(instance, Notice, "parse", "done in {} ms", ms)`
macro_rules! emit {
    ($instance:expr, $level:ident, $module:expr, $($arg:tt)+) => {
        $instance.emit(
            $crate::instance::LogLevel::$level,
            $module,
            format_args!($($arg)+),
        )
    };
}

pub(crate) use emit;
