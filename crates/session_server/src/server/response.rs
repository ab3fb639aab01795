//! Response framing.

use crate::current_timestamp;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A `200 OK` response with a body. Every connection carries exactly one.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    content_type: &'static str,
    body: String,
}

impl Response {
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            content_type: "application/json; charset=UTF-8",
            body: body.into(),
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self {
            content_type: "text/plain; charset=UTF-8",
            body: body.into(),
        }
    }

    /// Reply sent for anything that is neither a poll nor an event.
    pub fn greeting() -> Self {
        Self::text(format!("Hello from pumpin server – {}", current_timestamp()))
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> std::io::Result<()> {
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.content_type,
            self.body.len()
        );
        writer.write_all(head.as_bytes()).await?;
        writer.write_all(self.body.as_bytes()).await?;
        writer.flush().await
    }
}
