//! Stream - a shared, positional byte stream backing one stored object.
//!
//! Every durable object (table header, column offsets, blob heap, index
//! tree) lives in its own [`Stream`]. All access is positional: callers
//! name the byte offset they read or write, so several owners (an index
//! and all of its tree nodes, for example) can share one stream handle
//! without tracking a common cursor.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{Error, Result};

/// The raw medium behind a [`Stream`].
pub trait StreamBackend: Read + Write + Seek + Send {
    /// Truncate or zero-extend to `len` bytes.
    fn resize(&mut self, len: u64) -> io::Result<()>;

    /// Push buffered bytes to the medium, optionally forcing them to disk.
    fn sync(&mut self, durable: bool) -> io::Result<()>;
}

impl StreamBackend for File {
    fn resize(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self, durable: bool) -> io::Result<()> {
        self.flush()?;
        if durable {
            self.sync_data()?;
        }
        Ok(())
    }
}

impl StreamBackend for Cursor<Vec<u8>> {
    fn resize(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().resize(len as usize, 0);
        Ok(())
    }

    fn sync(&mut self, _durable: bool) -> io::Result<()> {
        Ok(())
    }
}

/// Cloneable handle to a byte stream.
///
/// # Thread Safety
/// The backend sits behind a `parking_lot::Mutex`; each positional call
/// holds the lock for its seek+read or seek+write pair, so the pair is
/// never interleaved with another caller's seek.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<Mutex<Box<dyn StreamBackend>>>,
}

impl Stream {
    pub fn new<B: StreamBackend + 'static>(backend: B) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(backend))),
        }
    }

    /// A fresh, empty in-memory stream.
    pub fn in_memory() -> Self {
        Self::new(Cursor::new(Vec::new()))
    }

    /// Current length in bytes.
    pub fn len(&self) -> Result<u64> {
        let mut backend = self.inner.lock();
        Ok(backend.seek(SeekFrom::End(0))?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Fill `buf` from `position`.
    pub fn read_at(&self, position: u64, buf: &mut [u8]) -> Result<()> {
        let mut backend = self.inner.lock();
        backend.seek(SeekFrom::Start(position))?;
        backend.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::Corrupted(format!(
                "read of {} bytes at {} runs past end of stream",
                buf.len(),
                position
            )),
            _ => Error::Io(e),
        })
    }

    pub fn read_vec_at(&self, position: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at(position, &mut buf)?;
        Ok(buf)
    }

    /// Overwrite bytes starting at `position`, extending the stream if needed.
    pub fn write_at(&self, position: u64, bytes: &[u8]) -> Result<()> {
        let mut backend = self.inner.lock();
        backend.seek(SeekFrom::Start(position))?;
        backend.write_all(bytes)?;
        Ok(())
    }

    /// Write `bytes` at the end of the stream and return where they start.
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        let mut backend = self.inner.lock();
        let position = backend.seek(SeekFrom::End(0))?;
        backend.write_all(bytes)?;
        Ok(position)
    }

    pub fn resize(&self, len: u64) -> Result<()> {
        self.inner.lock().resize(len)?;
        Ok(())
    }

    pub fn flush(&self, durable: bool) -> Result<()> {
        self.inner.lock().sync(durable)?;
        Ok(())
    }

    pub fn read_u8_at(&self, position: u64) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_at(position, &mut buf)?;
        Ok(buf[0])
    }

    pub fn read_i32_at(&self, position: u64) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_at(position, &mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub fn read_i64_at(&self, position: u64) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read_at(position, &mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    pub fn write_i32_at(&self, position: u64, value: i32) -> Result<()> {
        self.write_at(position, &value.to_le_bytes())
    }

    pub fn write_i64_at(&self, position: u64, value: i64) -> Result<()> {
        self.write_at(position, &value.to_le_bytes())
    }

    /// Sequential reader starting at `position`.
    pub fn cursor(&self, position: u64) -> StreamCursor<'_> {
        StreamCursor {
            stream: self,
            position,
        }
    }

    /// True if both handles refer to the same backend.
    pub fn same_stream(&self, other: &Stream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").finish_non_exhaustive()
    }
}

/// Reads header fields one after another.
pub struct StreamCursor<'a> {
    stream: &'a Stream,
    position: u64,
}

impl StreamCursor<'_> {
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let value = self.stream.read_i32_at(self.position)?;
        self.position += 4;
        Ok(value)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let value = self.stream.read_i64_at(self.position)?;
        self.position += 8;
        Ok(value)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        let value = self.stream.read_u8_at(self.position)?;
        self.position += 1;
        Ok(value != 0)
    }

    /// Read a non-negative `i32` count or length.
    pub fn read_len(&mut self) -> Result<usize> {
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_| Error::Corrupted(format!("negative length {}", len)))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let bytes = self.stream.read_vec_at(self.position, len)?;
        self.position += len as u64;
        Ok(bytes)
    }

    /// Read a `[i32 len][utf-8 bytes]` string.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_len()?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|e| Error::Corrupted(format!("invalid utf-8 name: {}", e)))
    }
}

/// Append a `[i32 len][utf-8 bytes]` string to a header buffer.
pub fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as i32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// Encoded size of a string written by [`put_string`].
pub fn string_len(s: &str) -> u64 {
    4 + s.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_returns_start_offset() {
        let stream = Stream::in_memory();
        assert_eq!(stream.append(b"abc").unwrap(), 0);
        assert_eq!(stream.append(b"defg").unwrap(), 3);
        assert_eq!(stream.len().unwrap(), 7);
    }

    #[test]
    fn test_write_and_read_at() {
        let stream = Stream::in_memory();
        stream.append(&[0u8; 16]).unwrap();
        stream.write_i64_at(8, -1).unwrap();
        stream.write_i32_at(0, 1234).unwrap();

        assert_eq!(stream.read_i32_at(0).unwrap(), 1234);
        assert_eq!(stream.read_i64_at(8).unwrap(), -1);
    }

    #[test]
    fn test_read_past_end_is_corruption() {
        let stream = Stream::in_memory();
        stream.append(b"ab").unwrap();
        assert!(matches!(stream.read_i32_at(0), Err(Error::Corrupted(_))));
    }

    #[test]
    fn test_cursor_reads_header_fields() {
        let stream = Stream::in_memory();
        let mut buf = Vec::new();
        put_string(&mut buf, "Products");
        buf.extend_from_slice(&5i32.to_le_bytes());
        buf.extend_from_slice(&(-1i64).to_le_bytes());
        buf.push(1);
        stream.append(&buf).unwrap();

        let mut cursor = stream.cursor(0);
        assert_eq!(cursor.read_string().unwrap(), "Products");
        assert_eq!(cursor.read_i32().unwrap(), 5);
        assert_eq!(cursor.read_i64().unwrap(), -1);
        assert!(cursor.read_bool().unwrap());
        assert_eq!(cursor.position(), string_len("Products") + 4 + 8 + 1);
    }

    #[test]
    fn test_shared_handle() {
        let stream = Stream::in_memory();
        let other = stream.clone();
        other.append(b"xyz").unwrap();

        assert!(stream.same_stream(&other));
        assert_eq!(stream.read_vec_at(0, 3).unwrap(), b"xyz");
    }

    #[test]
    fn test_resize_zero_extends() {
        let stream = Stream::in_memory();
        stream.append(b"ab").unwrap();
        stream.resize(6).unwrap();
        assert_eq!(stream.read_vec_at(0, 6).unwrap(), b"ab\0\0\0\0");
    }

    #[test]
    fn test_file_backend() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stream.dat");
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .unwrap();

        let stream = Stream::new(file);
        let pos = stream.append(b"persist").unwrap();
        stream.flush(true).unwrap();

        assert_eq!(pos, 0);
        assert_eq!(std::fs::read(&path).unwrap(), b"persist");
    }
}
