//! Splitter for `multipart/x-mixed-replace` JPEG preview streams.
//!
//! The processing endpoint may answer with a stream of parts shaped like
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! \r\n
//! <jpeg bytes>\r\n
//! ```
//!
//! Network chunks split parts at arbitrary offsets; [`MjpegSplitter`]
//! buffers until a whole part is available.

use tracing::trace;

/// Boundary the processing service uses when the header omits one.
pub const DEFAULT_BOUNDARY: &str = "frame";

/// Incremental multipart splitter.
#[derive(Debug, Clone)]
pub struct MjpegSplitter {
    delimiter: Vec<u8>,
    buf: Vec<u8>,
    ended: bool,
}

impl MjpegSplitter {
    #[must_use]
    pub fn new(boundary: &str) -> Self {
        let boundary = boundary.trim().trim_matches('"');
        let boundary = boundary.strip_prefix("--").unwrap_or(boundary);
        Self {
            delimiter: format!("--{boundary}").into_bytes(),
            buf: Vec::new(),
            ended: false,
        }
    }

    /// Feed one network chunk; returns every part body it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        if self.ended {
            return Vec::new();
        }
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_part() {
            frames.push(frame);
        }
        frames
    }

    /// Flush a final part that had no closing delimiter.
    #[must_use]
    pub fn finish(mut self) -> Option<Vec<u8>> {
        if self.ended {
            return None;
        }
        let start = find(&self.buf, &self.delimiter, 0)?;
        let header_end = find(&self.buf, b"\r\n\r\n", start)?;
        let mut body = self.buf.split_off(header_end + 4);
        if body.ends_with(b"\r\n") {
            body.truncate(body.len() - 2);
        }
        (!body.is_empty()).then_some(body)
    }

    fn next_part(&mut self) -> Option<Vec<u8>> {
        let start = find(&self.buf, &self.delimiter, 0)?;
        self.buf.drain(..start);

        let after = self.delimiter.len();
        if self.buf.get(after..after + 2) == Some(b"--") {
            self.ended = true;
            self.buf.clear();
            return None;
        }

        let header_end = find(&self.buf, b"\r\n\r\n", after)?;
        let body_start = header_end + 4;
        let length = content_length(&self.buf[after..header_end]);

        let (body_end, consumed) = match length {
            Some(n) if self.buf.len() >= body_start + n => (body_start + n, body_start + n),
            Some(_) => return None,
            None => {
                let mut next = b"\r\n".to_vec();
                next.extend_from_slice(&self.delimiter);
                let end = find(&self.buf, &next, body_start)?;
                (end, end + 2)
            }
        };

        let frame = self.buf[body_start..body_end].to_vec();
        self.buf.drain(..consumed);
        trace!(bytes = frame.len(), "multipart frame");
        Some(frame)
    }
}

/// `boundary` parameter of a multipart content type.
#[must_use]
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// `true` if `frame` starts with a JPEG SOI marker.
#[must_use]
pub fn is_jpeg(frame: &[u8]) -> bool {
    frame.starts_with(&[0xFF, 0xD8])
}

fn content_length(headers: &[u8]) -> Option<usize> {
    String::from_utf8_lossy(headers).lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-length")
            .then(|| value.trim().parse().ok())
            .flatten()
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(body: &[u8]) -> Vec<u8> {
        let mut out = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n");
        out
    }

    fn stream(bodies: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for b in bodies {
            out.extend(part(b));
        }
        out.extend_from_slice(b"--frame--\r\n");
        out
    }

    const A: &[u8] = &[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9];
    const B: &[u8] = &[0xFF, 0xD8, b'\r', b'\n', b'-', 0xFF, 0xD9];

    #[test]
    fn whole_stream_in_one_chunk() {
        let mut s = MjpegSplitter::new("frame");
        let frames = s.push(&stream(&[A, B]));
        assert_eq!(frames, vec![A.to_vec(), B.to_vec()]);
        assert!(frames.iter().all(|f| is_jpeg(f)));
    }

    #[test]
    fn every_split_point_yields_same_frames() {
        let data = stream(&[A, B, A]);
        for cut in 0..data.len() {
            let mut s = MjpegSplitter::new("frame");
            let mut frames = s.push(&data[..cut]);
            frames.extend(s.push(&data[cut..]));
            assert_eq!(frames, vec![A.to_vec(), B.to_vec(), A.to_vec()], "cut at {cut}");
        }
    }

    #[test]
    fn byte_at_a_time() {
        let data = stream(&[A, B]);
        let mut s = MjpegSplitter::new("--frame");
        let frames: Vec<_> = data.iter().flat_map(|b| s.push(&[*b])).collect();
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn content_length_parts() {
        let mut data = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 7\r\n\r\n".to_vec();
        data.extend_from_slice(A);
        data.extend_from_slice(b"\r\n--frame\r\ncontent-length: 7\r\n\r\n");
        data.extend_from_slice(B);
        let mut s = MjpegSplitter::new("frame");
        assert_eq!(s.push(&data), vec![A.to_vec(), B.to_vec()]);
    }

    #[test]
    fn trailing_part_flushed_on_finish() {
        let mut s = MjpegSplitter::new("frame");
        let mut data = part(A);
        data.extend(part(B));
        assert_eq!(s.push(&data), vec![A.to_vec()]);
        assert_eq!(s.finish(), Some(B.to_vec()));
    }

    #[test]
    fn preamble_ignored() {
        let mut data = b"garbage before the first part\r\n".to_vec();
        data.extend(stream(&[A]));
        let mut s = MjpegSplitter::new("frame");
        assert_eq!(s.push(&data), vec![A.to_vec()]);
    }

    #[test]
    fn boundary_parsing() {
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace; boundary=frame").as_deref(),
            Some("frame")
        );
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace;Boundary=\"abc\"").as_deref(),
            Some("abc")
        );
        assert_eq!(boundary_from_content_type("video/mp4"), None);
    }
}
