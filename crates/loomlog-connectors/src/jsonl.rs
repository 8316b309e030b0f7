//! Shared JSON-lines sink loop.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use loomlog_core::stream::drain;
use loomlog_core::BoxedStream;
use loomlog_runtime::RuntimeError;

/// Writes each entry as one JSON document per line until the stream ends
/// or `ctx` fires. The stream is drained on cancellation and on write
/// errors.
pub(crate) async fn write_json_lines<W>(
    ctx: &CancellationToken,
    mut stream: BoxedStream,
    writer: &mut W,
) -> Result<(), RuntimeError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        if ctx.is_cancelled() {
            drain(stream);
            return writer.flush().await.map_err(RuntimeError::from);
        }
        match stream.next_entry().await {
            Ok((entry, _)) => {
                let mut line = serde_json::to_vec(&entry)
                    .map_err(|err| RuntimeError::Plugin(err.to_string()))?;
                line.push(b'\n');
                if let Err(err) = writer.write_all(&line).await {
                    drain(stream);
                    return Err(err.into());
                }
            }
            Err(err) if err.is_end() => {
                return writer.flush().await.map_err(RuntimeError::from);
            }
            Err(err) => {
                drain(stream);
                return Err(RuntimeError::Plugin(err.to_string()));
            }
        }
    }
}
