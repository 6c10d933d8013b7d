mod queuing_strategy;
mod readable;
mod utils;

pub use queuing_strategy::{QueuingStrategy, SizeAlgorithm};
pub use readable::{
    bridge, ByobRead, ByobRequest, ByteStream, ByteView, CancelAlgorithm, PullAlgorithm,
    ReadableByteStreamController, ReadableStream, ReadableStreamAsyncIterator,
    ReadableStreamByobReader, ReadableStreamDefaultController, ReadableStreamDefaultReader,
    SourceFuture, StartAlgorithm, UnderlyingByteSource, UnderlyingSource,
};

#[cfg(test)]
mod tests;
