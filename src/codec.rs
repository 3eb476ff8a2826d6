//! Text framing of requests and responses.
//!
//! ```text
//! Request:  METHOD SP TARGET SP HTTP/1.0 CRLF
//!           [Content-Length: n CRLF]
//!           CRLF
//!           [body]
//!
//! Response: HTTP/1.0 SP CODE SP MESSAGE CRLF
//!           *(header CRLF)
//!           CRLF
//!           [body]
//! ```
//!
//! Both directions are provided so that broker stubs can reuse the same framing.

use crate::error::{MqError, Result};
use crate::message::{Method, Request, Response};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const PROTOCOL_VERSION: &str = "HTTP/1.0";

const MAX_LINE_LENGTH: u64 = 8192;

pub fn encode_request(request: &Request) -> Vec<u8> {
    let mut out = format!(
        "{} {} {}\r\n",
        request.method, request.target, PROTOCOL_VERSION
    )
    .into_bytes();
    if let Some(body) = &request.body {
        out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    if let Some(body) = &request.body {
        out.extend_from_slice(body);
    }
    out
}

pub fn encode_response(response: &Response) -> Vec<u8> {
    let mut out = format!(
        "{} {} {}\r\n",
        PROTOCOL_VERSION, response.status, response.reason
    )
    .into_bytes();
    if !response.body.is_empty() {
        out.extend_from_slice(format!("Content-Length: {}\r\n", response.body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&response.body);
    out
}

pub async fn write_request<W>(writer: &mut W, request: &Request) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_all(writer, &encode_request(request)).await
}

pub async fn write_response<W>(writer: &mut W, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_all(writer, &encode_response(response)).await
}

async fn write_all<W>(writer: &mut W, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(bytes).await.map_err(connection_error)?;
    writer.flush().await.map_err(connection_error)
}

/// Reads one response. End of stream anywhere before the blank line that closes
/// the headers is a protocol error, never an empty response.
///
/// The body is framed by `Content-Length` only. Without that header the body is
/// empty and nothing after the blank line is consumed, so a broker that sends a
/// bare body line leaves it in the stream; [`Connection::round_trip`] reports
/// such leftovers as a protocol error.
///
/// [`Connection::round_trip`]: crate::connection::Connection::round_trip
pub async fn read_response<R>(reader: &mut R, max_body: usize) -> Result<Response>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let status_line = read_line(reader)
        .await?
        .ok_or_else(|| MqError::Protocol("connection closed before status line".to_string()))?;
    let (status, reason) = parse_status_line(&status_line)?;

    let content_length = read_headers(reader).await?;
    let body = read_body(reader, content_length, max_body).await?;

    Ok(Response {
        status,
        reason,
        body,
    })
}

/// Reads one request, returning `None` when the peer closed the stream cleanly
/// before sending a request line.
pub async fn read_request<R>(reader: &mut R, max_body: usize) -> Result<Option<Request>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let Some(request_line) = read_line(reader).await? else {
        return Ok(None);
    };
    let (method, target) = parse_request_line(&request_line)?;

    let body = match read_headers(reader).await? {
        Some(length) => Some(read_body(reader, Some(length), max_body).await?),
        None => None,
    };

    Ok(Some(Request::new(method, target, body)))
}

fn parse_status_line(line: &str) -> Result<(u16, String)> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(MqError::Protocol(format!("malformed status line: {:?}", line)));
    }

    let status = parts
        .next()
        .filter(|code| code.len() == 3)
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..1000).contains(code))
        .ok_or_else(|| MqError::Protocol(format!("invalid status code in {:?}", line)))?;
    let reason = parts.next().unwrap_or_default().to_string();

    Ok((status, reason))
}

fn parse_request_line(line: &str) -> Result<(Method, String)> {
    let parts: Vec<&str> = line.split(' ').collect();
    if parts.len() != 3 || !parts[2].starts_with("HTTP/") || !parts[1].starts_with('/') {
        return Err(MqError::Protocol(format!("malformed request line: {:?}", line)));
    }
    let method = Method::parse(parts[0])
        .ok_or_else(|| MqError::Protocol(format!("unsupported method {:?}", parts[0])))?;
    Ok((method, parts[1].to_string()))
}

/// Consumes header lines through the blank terminator and returns `Content-Length`.
async fn read_headers<R>(reader: &mut R) -> Result<Option<usize>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut content_length = None;
    loop {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| MqError::Protocol("connection closed before end of headers".to_string()))?;
        if line.is_empty() {
            return Ok(content_length);
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| MqError::Protocol(format!("malformed header: {:?}", line)))?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            let length = value.trim().parse::<usize>().map_err(|_| {
                MqError::Protocol(format!("invalid Content-Length: {:?}", value.trim()))
            })?;
            content_length = Some(length);
        }
    }
}

async fn read_body<R>(reader: &mut R, length: Option<usize>, max_body: usize) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let Some(length) = length else {
        return Ok(Vec::new());
    };
    if length > max_body {
        return Err(MqError::Protocol(format!(
            "body of {} bytes exceeds limit of {}",
            length, max_body
        )));
    }

    let mut body = vec![0; length];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            MqError::Protocol("connection closed in the middle of a body".to_string())
        } else {
            connection_error(e)
        }
    })?;
    Ok(body)
}

/// Reads one CRLF (or bare LF) terminated line without its terminator.
/// `None` means the stream ended before any byte of the line arrived.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(MAX_LINE_LENGTH)
        .read_until(b'\n', &mut buf)
        .await
        .map_err(connection_error)?;
    if read == 0 {
        return Ok(None);
    }

    if buf.last() != Some(&b'\n') {
        return Err(if read as u64 == MAX_LINE_LENGTH {
            MqError::Protocol(format!("line exceeds {} bytes", MAX_LINE_LENGTH))
        } else {
            MqError::Protocol("connection closed in the middle of a line".to_string())
        });
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }

    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| MqError::Protocol("line is not valid UTF-8".to_string()))
}

pub(crate) fn connection_error(error: io::Error) -> MqError {
    MqError::Connection(error.to_string())
}
