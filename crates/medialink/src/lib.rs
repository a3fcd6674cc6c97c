// medialink
//
// Safe bindings over the medialink engine. Everything here talks to the
// engine through its C ABI only: native objects are owned through
// `NativeHandle`, Rust readers are adapted with `StreamBridge`, and engine
// callbacks reach subscribers through a per-engine relay thread.

pub mod engine;
pub mod error;
pub mod event;
mod ffi;
pub mod handle;
pub mod media;
pub mod player;
mod relay;
pub mod stream;

use std::sync::Once;

pub use engine::Engine;
pub use error::{Error, Result};
pub use event::{LogEntry, MediaEvent, PlayerEvent};
pub use handle::{HandleId, NativeHandle};
pub use media::{FromType, Media, ParseOptions, Statistics, Track, TrackData};
pub use medialink_engine::{LogLevel, MetaKey, ParseFlags, ParsedStatus, PlayerState};
pub use player::MediaPlayer;
pub use relay::{SubscriptionId, TIME_THROTTLE};
pub use stream::StreamBridge;

static INIT_LOGGER: Once = Once::new();

/// Install `env_logger` once; later calls and existing loggers are left alone
pub fn init_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder()
            .is_test(false)
            .filter_level(log::LevelFilter::Info)
            .parse_default_env()
            .try_init();
    });
}
