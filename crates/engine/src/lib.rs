// medialink engine
//
// Probing, parsing and clock-paced playback of local media, exposed through
// a C ABI (`abi`). Output goes to a null sink: packets are demuxed, decoded
// and paced in real time (times `--rate`) but never rendered.

pub mod abi;
pub mod callback;
pub mod clock;
pub mod decode;
pub mod demux;
pub mod error;
pub mod instance;
pub mod media;
pub mod meta;
pub mod options;
pub mod parse;
pub mod player;
pub mod source;
pub mod stats;

pub use callback::{EventCallback, EventKind, RawEvent};
pub use error::{EngineError, Result};
pub use instance::{Instance, LogCallback, LogLevel};
pub use media::Media;
pub use meta::MetaKey;
pub use options::EngineOptions;
pub use parse::{ParseFlags, ParsedStatus};
pub use player::{Player, PlayerState};
pub use source::{StreamCallbacks, UNKNOWN_SIZE};
pub use stats::StatsSnapshot;
