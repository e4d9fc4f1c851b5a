// Data Models
pub mod job;
pub mod progress;
pub mod request;

pub use job::{JobHandle, JobId, JobKind, JobState};
pub use progress::{ProgressSink, ProgressState};
pub use request::{
    AesKeyStrength, Codec, CodecOptions, FormatOptions, JobRequest, SevenZOptions,
    TarCompression, TarOptions, ZipEncryption, ZipLevel, ZipMethod, ZipOptions,
};
