//! Feeding a byte stream into an [`InboundHandler`].
//!
//! [`serve_connection`] is the glue between a socket and the inbound
//! pipeline. It reads fixed-size chunks, wraps each in a pooled
//! [`FramedBuffer`](crate::buffer::FramedBuffer), and hands them to the
//! handler until the peer goes away.

use std::{io, sync::Arc};

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{buffer::BufferPool, config::InboundConfig, handler::InboundHandler};

/// Pump `reader` into `handler` until end of stream.
///
/// At end of stream the handler is told no more input will arrive, so every
/// complete message already read is still delivered. An I/O error closes the
/// handler outright. A protocol failure detected by the handler, or a
/// shutdown request, ends the read loop even while the peer is silent. The
/// call returns after the deserialising task has finished.
///
/// # Errors
///
/// Returns the I/O error that ended the read loop, if any.
pub async fn serve_connection<R>(
    mut reader: R,
    handler: &InboundHandler,
    pool: &Arc<BufferPool>,
    config: &InboundConfig,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let tag = handler.connection().log_tag();
    let mut chunk = vec![0_u8; config.read_chunk_size];
    let result = loop {
        tokio::select! {
            biased;

            () = handler.cancelled() => {
                debug!("{tag} handler closed, stopping reads");
                handler.close();
                break Ok(());
            }

            res = reader.read(&mut chunk) => match res {
                Ok(0) => {
                    debug!("{tag} peer closed connection");
                    handler.end_of_input();
                    break Ok(());
                }
                Ok(n) => handler.on_bytes_received(pool.wrap(chunk[..n].to_vec())),
                Err(e) => {
                    warn!("{tag} read failed: error={e}");
                    handler.close();
                    break Err(e);
                }
            },
        }
    };
    handler.wait().await;
    result
}
