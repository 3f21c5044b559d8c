//! Splitting images into transfer-sized chunks.

use std::slice::Chunks;

/// Largest PROG_MULTI payload the uploader sends.
///
/// The count byte allows 255 and the board wants a multiple of four, but 60
/// is the size known to work on every bootloader build.
pub const PROG_MULTI_MAX: usize = 60;

/// Largest READ_MULTI request the uploader sends.
///
/// Requests of 64 bytes or more overflow something on the board.
pub const READ_MULTI_MAX: usize = 60;

/// Split `buf` into order-preserving slices of at most `max_len` bytes.
///
/// Only the last slice may be shorter. An empty buffer yields no slices.
///
/// # Panics
///
/// Panics if `max_len` is zero.
pub fn split(buf: &[u8], max_len: usize) -> Chunks<'_, u8> {
    assert!(max_len > 0, "chunk size must be non-zero");
    buf.chunks(max_len)
}
