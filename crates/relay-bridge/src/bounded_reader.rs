//! A line reader with a hard byte cap per line, so a child process cannot
//! force the bridge into unbounded buffering.

use tokio::io::{AsyncRead, AsyncReadExt};

pub const DEFAULT_STREAM_LIMIT: usize = 64 * 1024;
pub const MIN_STREAM_LIMIT: usize = 64 * 1024;
pub const MAX_STREAM_LIMIT: usize = 64 * 1024 * 1024;

pub fn clamp_stream_limit(limit: usize) -> usize {
    limit.clamp(MIN_STREAM_LIMIT, MAX_STREAM_LIMIT)
}

pub enum BoundedLine {
    Line(Vec<u8>),
    Eof,
    Overflow,
}

/// Reads one `\n`-terminated line (the trailing newline is stripped) up to
/// `limit` bytes. If the line is not terminated within `limit` bytes, the
/// remainder up to the next `\n` (or EOF) is discarded and `Overflow` is
/// returned so the caller's framing stays in sync with the child's stream.
pub async fn read_bounded_line<R: AsyncRead + Unpin>(reader: &mut R, limit: usize) -> std::io::Result<BoundedLine> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(BoundedLine::Eof);
            }
            return Ok(BoundedLine::Line(buf));
        }
        if byte[0] == b'\n' {
            return Ok(BoundedLine::Line(buf));
        }
        buf.push(byte[0]);
        if buf.len() > limit {
            discard_until_newline(reader).await?;
            return Ok(BoundedLine::Overflow);
        }
    }
}

async fn discard_until_newline<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<()> {
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte).await?;
        if n == 0 || byte[0] == b'\n' {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_lines_under_the_limit() {
        let mut cursor = std::io::Cursor::new(b"hello\nworld\n".to_vec());
        let first = read_bounded_line(&mut cursor, 1024).await.unwrap();
        assert!(matches!(first, BoundedLine::Line(l) if l == b"hello"));
        let second = read_bounded_line(&mut cursor, 1024).await.unwrap();
        assert!(matches!(second, BoundedLine::Line(l) if l == b"world"));
        let third = read_bounded_line(&mut cursor, 1024).await.unwrap();
        assert!(matches!(third, BoundedLine::Eof));
    }

    #[tokio::test]
    async fn overflowing_line_is_discarded_and_flagged() {
        let mut cursor = std::io::Cursor::new(b"0123456789abcdef\nok\n".to_vec());
        let first = read_bounded_line(&mut cursor, 4).await.unwrap();
        assert!(matches!(first, BoundedLine::Overflow));
        let second = read_bounded_line(&mut cursor, 1024).await.unwrap();
        assert!(matches!(second, BoundedLine::Line(l) if l == b"ok"));
    }

    #[test]
    fn clamp_stream_limit_respects_bounds() {
        assert_eq!(clamp_stream_limit(10), MIN_STREAM_LIMIT);
        assert_eq!(clamp_stream_limit(usize::MAX), MAX_STREAM_LIMIT);
        assert_eq!(clamp_stream_limit(128 * 1024), 128 * 1024);
    }
}
