//! Git packet-line framing.
//!
//! # Packet-line format
//!
//! Each packet line is prefixed with a 4-character lowercase hex length that
//! includes itself:
//!
//! - `0000` -- flush packet (end of section)
//! - `0004`+ -- data packet (length includes the 4 prefix bytes)

use bytes::{BufMut, Bytes, BytesMut};

use crate::git::Service;

/// The flush packet.
pub const FLUSH_PKT: &[u8] = b"0000";

/// Largest frame the protocol allows, prefix included.
pub const MAX_PKT_LEN: usize = 65520;

/// Append `data` to `buf` as one packet line.
///
/// The length includes the 4 prefix bytes.  Callers are responsible for
/// including any trailing newline in `data` and for keeping the frame within
/// [`MAX_PKT_LEN`].
pub fn put_pkt_line(buf: &mut BytesMut, data: &[u8]) {
    let total_len = data.len() + 4;
    debug_assert!(
        total_len <= MAX_PKT_LEN,
        "packet-line data too large ({total_len} bytes)"
    );
    buf.reserve(total_len);
    buf.put_slice(format!("{total_len:04x}").as_bytes());
    buf.put_slice(data);
}

/// The smart-HTTP preamble for an info/refs response:
/// `# service=<service>\n` as a packet line, followed by a flush packet.
pub fn service_announcement(service: Service) -> Bytes {
    let line = format!("# service={}\n", service.name());
    let mut buf = BytesMut::with_capacity(line.len() + 8);
    put_pkt_line(&mut buf, line.as_bytes());
    buf.put_slice(FLUSH_PKT);
    buf.freeze()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
