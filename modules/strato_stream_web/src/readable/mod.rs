pub mod bridge;
mod byob_reader;
mod byte_controller;
mod controller;
mod default_controller;
mod default_reader;
mod iterator;
mod objects;
mod reader;
mod stream;

pub use byob_reader::ReadableStreamByobReader;
pub use byte_controller::{ByobRequest, ReadableByteStreamController};
pub use default_controller::ReadableStreamDefaultController;
pub use default_reader::ReadableStreamDefaultReader;
pub use iterator::ReadableStreamAsyncIterator;
pub use objects::ByteView;
pub use reader::ByobRead;
pub use stream::{
    ByteStream, CancelAlgorithm, PullAlgorithm, ReadableStream, SourceFuture, StartAlgorithm,
    UnderlyingByteSource, UnderlyingSource,
};
