//! Per-connection request handling.

use super::response::Response;
use crate::codec::{parse_content_length, ClientEvent, RequestLine};
use crate::context::ServerContext;
use crate::error::ServerError;
use crate::queues::encode_command_batch;
use std::net::IpAddr;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tracing::debug;

/// Upper bound on the buffer reserved up front for a body. Larger bodies
/// are still read in full; the buffer grows as bytes arrive.
pub const BODY_PREALLOC_BYTES: usize = 64 * 1024;

/// Serve exactly one request on `stream`, then return.
///
/// Reads the request line; a command poll is answered straight from the
/// queue. Anything else reads the header block and, for a POST with a body,
/// applies the event. A short body is used as-is rather than rejected.
pub async fn handle_connection<S>(stream: S, peer: IpAddr, context: &ServerContext) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);

    let Some(line) = read_line(&mut reader).await? else {
        return Ok(());
    };
    let request = RequestLine::parse(&line);

    if let Some(steam_id) = request.command_poll_target() {
        skip_headers(&mut reader).await?;
        let commands = context.queues.drain_commands(&steam_id);
        debug!("Poll from {} for SteamID={}: {} command(s)", peer, steam_id, commands.len());
        return Response::json(encode_command_batch(&commands))
            .write_to(reader.get_mut())
            .await
            .map_err(ServerError::from);
    }

    let mut content_length = 0usize;
    while let Some(header) = read_line(&mut reader).await? {
        if header.is_empty() {
            break;
        }
        if let Some(len) = parse_content_length(&header) {
            content_length = len;
        }
    }

    let mut body = String::new();
    if request.is_post() && content_length > 0 {
        let mut buf = Vec::with_capacity(content_length.min(BODY_PREALLOC_BYTES));
        (&mut reader)
            .take(content_length as u64)
            .read_to_end(&mut buf)
            .await?;
        body = String::from_utf8_lossy(&buf).into_owned();
    }

    let response = if request.is_post() && !body.is_empty() {
        let event = ClientEvent::parse(body);
        context.handle_event(peer, &event).await;
        Response::text("OK")
    } else {
        Response::greeting()
    };
    response.write_to(reader.get_mut()).await?;
    Ok(())
}

/// One CRLF/LF-terminated line without its terminator. `None` at EOF.
async fn read_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Result<Option<String>, ServerError> {
    let mut raw = Vec::new();
    if reader.read_until(b'\n', &mut raw).await? == 0 {
        return Ok(None);
    }
    while matches!(raw.last(), Some(b'\n' | b'\r')) {
        raw.pop();
    }
    Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
}

async fn skip_headers<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Result<(), ServerError> {
    while let Some(header) = read_line(reader).await? {
        if header.is_empty() {
            break;
        }
    }
    Ok(())
}
