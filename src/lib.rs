pub mod header;
pub mod names;
pub mod export;
pub mod container;
pub mod codec;

pub use header::ContainerHeader;
pub use export::ExportRecord;
pub use container::{decode, ContainerError, ContainerResource, DecodeOptions, DecodedContainer, ExportRange};
pub use codec::{CodecError, CodecMethod, CodecRegistry};
pub use names::{name_hash, Name};
