pub mod capture;
pub mod file;
pub mod frame;
pub mod multiplexer;
pub mod source;

pub use capture::{encode_wav, CaptureBuffer, Recording};
pub use file::AudioFile;
pub use frame::{samples_per_frame, AudioFrame, FRAMES_PER_SECOND, FRAME_DURATION};
pub use multiplexer::{PlaybackMode, PlaybackMultiplexer};
pub use source::{FileSourceOpener, PlaybackSource, ReplySource, SilenceSource, SourceOpener};
