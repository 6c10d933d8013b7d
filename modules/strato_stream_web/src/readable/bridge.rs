use bytes::Bytes;
use strato_exceptions::{WebError, WebResult};
use strato_utils::channel::{BufferChannelWriter, ChannelError};

use super::objects::ByteView;
use super::stream::ReadableStream;

/// Pumps a byte stream into a native byte-stream resource.
///
/// Writes take the synchronous path first and fall back to an awaiting
/// write on the Full sentinel. A closed resource cancels the reader with
/// the same reason; stream end or error closes the resource. Either way
/// both sides close exactly once.
pub async fn pump_to_channel(
    stream: ReadableStream<ByteView>,
    writer: BufferChannelWriter<Bytes>,
) -> WebResult<()> {
    let reader = stream.get_reader()?;

    loop {
        match reader.read().await {
            Ok(Some(view)) => {
                let bytes = Bytes::from(view.into_buffer_window());
                let written = match writer.try_write(bytes) {
                    Ok(()) => Ok(()),
                    Err((ChannelError::Full, bytes)) => writer.write(bytes).await,
                    Err((_, _)) => Err(ChannelError::Closed),
                };
                if written.is_err() {
                    let e = WebError::type_error("The stream resource was closed");
                    let _ = reader.cancel(Some(e.clone())).await;
                    writer.close();
                    return Err(e);
                }
            },
            Ok(None) => {
                writer.close();
                return Ok(());
            },
            Err(e) => {
                writer.close();
                return Err(e);
            },
        }
    }
}
