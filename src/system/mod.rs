// System Layer
pub mod archive;
pub mod codec;
pub mod job;
pub mod rar;
pub mod sevenz;
pub mod tar;
pub mod volume;
pub mod zip;

pub use archive::{detect_archive_format, ArchiveFormat};
pub use job::{ArchiveJob, CancelProbe, CreateTarget, ExtractTarget, JobContext};
pub use volume::{split_into_volumes, MultiVolumeReader, VolumeSet};
