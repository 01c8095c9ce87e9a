//! Request line
//!
//! Every connection opens with one NUL-terminated line `<M><path>`, where
//! `M` is `P` (submit a stream) or `G` (watch a stream) and the path is
//! `/<game_id>/<name>.<ext>`.

use std::fmt;
use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, RequestError, Result};
use crate::protocol::constants::{
    EXT_FAF_REPLAY, EXT_GALACTIC_WAR_REPLAY, METHOD_GET, METHOD_POST,
};

/// Request method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Submitter streaming a game in
    Post,
    /// Viewer streaming a game out
    Get,
}

/// Format of a submitted stream, from the path extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayFormat {
    Faf,
    GalacticWar,
}

impl ReplayFormat {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            EXT_FAF_REPLAY => Some(ReplayFormat::Faf),
            EXT_GALACTIC_WAR_REPLAY => Some(ReplayFormat::GalacticWar),
            _ => None,
        }
    }

    pub fn is_galactic_war(&self) -> bool {
        matches!(self, ReplayFormat::GalacticWar)
    }
}

/// Parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayRequest {
    pub method: Method,
    pub game_id: u64,
    /// Last path segment
    pub name: String,
    /// Only set for POST
    pub format: Option<ReplayFormat>,
}

impl ReplayRequest {
    pub fn parse(line: &str) -> std::result::Result<Self, RequestError> {
        let method = match line.as_bytes().first() {
            Some(&METHOD_POST) => Method::Post,
            Some(&METHOD_GET) => Method::Get,
            _ => return Err(RequestError::UnknownMethod(line.to_string())),
        };
        // Method byte is ASCII
        let path = &line[1..];

        let mut segments = path.split('/');
        let game_id = segments
            .nth(1)
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| RequestError::InvalidPath(path.to_string()))?;
        let name = path.rsplit('/').next().unwrap_or_default().to_string();

        let format = match method {
            Method::Post => {
                let ext = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
                let format = ReplayFormat::from_extension(ext)
                    .ok_or_else(|| RequestError::UnknownReplayFormat(path.to_string()))?;
                Some(format)
            }
            Method::Get => None,
        };

        Ok(Self {
            method,
            game_id,
            name,
            format,
        })
    }
}

impl fmt::Display for ReplayRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = match self.method {
            Method::Post => "POST",
            Method::Get => "GET",
        };
        write!(f, "{} /{}/{}", method, self.game_id, self.name)
    }
}

/// Read the NUL-terminated request line
///
/// Returns the line and whatever was read past the terminator, which
/// belongs to the stream body.
pub async fn read_request_line<R>(reader: &mut R, max_len: usize) -> Result<(String, BytesMut)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(max_len.min(4096));
    let mut scanned = 0;

    loop {
        if let Some(pos) = buf[scanned..].iter().position(|&b| b == 0) {
            let end = scanned + pos;
            let line = buf.split_to(end);
            // terminator
            let _ = buf.split_to(1);
            let line = String::from_utf8_lossy(&line).into_owned();
            return Ok((line, buf));
        }
        scanned = buf.len();

        if scanned >= max_len {
            return Err(RequestError::RequestTooLong.into());
        }

        buf.reserve(max_len.min(4096));
        if reader.read_buf(&mut buf).await? == 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before request line",
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_post() {
        let req = ReplayRequest::parse("P/123456/alice.fafreplay").unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.game_id, 123456);
        assert_eq!(req.name, "alice.fafreplay");
        assert_eq!(req.format, Some(ReplayFormat::Faf));
        assert_eq!(req.to_string(), "POST /123456/alice.fafreplay");
    }

    #[test]
    fn test_parse_galactic_war() {
        let req = ReplayRequest::parse("P/9/bob.gwreplay").unwrap();
        assert!(req.format.unwrap().is_galactic_war());
    }

    #[test]
    fn test_parse_get_ignores_extension() {
        let req = ReplayRequest::parse("G/77/whatever.scfareplay").unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.game_id, 77);
        assert_eq!(req.format, None);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            ReplayRequest::parse("X/1/a.fafreplay"),
            Err(RequestError::UnknownMethod("X/1/a.fafreplay".into()))
        );
        assert!(matches!(
            ReplayRequest::parse(""),
            Err(RequestError::UnknownMethod(_))
        ));
        assert_eq!(
            ReplayRequest::parse("P/1/a.scfareplay"),
            Err(RequestError::UnknownReplayFormat("/1/a.scfareplay".into()))
        );
        assert_eq!(
            ReplayRequest::parse("P/1/noext"),
            Err(RequestError::UnknownReplayFormat("/1/noext".into()))
        );
        assert_eq!(
            ReplayRequest::parse("G/abc/a"),
            Err(RequestError::InvalidPath("/abc/a".into()))
        );
    }

    #[tokio::test]
    async fn test_read_line_with_leftover() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"P/5/a.faf")
            .read(b"replay\0\x01\x02")
            .build();
        let (line, rest) = read_request_line(&mut reader, 1024).await.unwrap();
        assert_eq!(line, "P/5/a.fafreplay");
        assert_eq!(&rest[..], &[1, 2]);
    }

    #[tokio::test]
    async fn test_read_line_too_long() {
        let mut reader = tokio_test::io::Builder::new().read(&[b'a'; 8]).build();
        let err = read_request_line(&mut reader, 8).await.unwrap_err();
        assert!(matches!(err, Error::Request(RequestError::RequestTooLong)));
    }

    #[tokio::test]
    async fn test_read_line_eof() {
        let mut reader = tokio_test::io::Builder::new().read(b"G/5").build();
        let err = read_request_line(&mut reader, 1024).await.unwrap_err();
        assert!(err.is_disconnect());
    }
}
