//! Guest memory access for host operations.
//!
//! Host operations receive `(ptr, len)` pairs into the guest's exported
//! `memory` and report failures as an [`Errno`] return value.

use wasmtime::{Caller, Extern, Memory};

/// Status codes returned to the guest by every host operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    Ok = 0,
    EventNotFound = 1,
    ClientNotFound = 2,
    RequestNotFound = 3,
    ResolverNotFound = 4,
    MemoryAccess = 5,
    InvalidUtf8 = 6,
    NotFound = 7,
    BufferTooSmall = 8,
    Eof = 9,
    HttpFailure = 10,
    DnsFailure = 11,
    Cancelled = 12,
    InvalidArgument = 13,
    UnsupportedEvent = 14,
}

impl Errno {
    /// The integer handed back to the guest.
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<Errno> for i32 {
    fn from(errno: Errno) -> Self {
        errno.code()
    }
}

/// Result of a guest-facing step.
pub type GuestResult<T> = std::result::Result<T, Errno>;

/// Collapse a guest-facing result into the status code returned to the guest.
pub fn status(result: GuestResult<()>) -> i32 {
    match result {
        Ok(()) => Errno::Ok.code(),
        Err(errno) => errno.code(),
    }
}

fn memory<T>(caller: &mut Caller<'_, T>) -> GuestResult<Memory> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or(Errno::MemoryAccess)
}

fn checked_span<T>(
    caller: &mut Caller<'_, T>,
    memory: &Memory,
    ptr: i32,
    len: usize,
) -> GuestResult<usize> {
    // wasm32 addresses are unsigned
    let offset = ptr as u32 as usize;
    let end = offset.checked_add(len).ok_or(Errno::MemoryAccess)?;
    if end > memory.data_size(&*caller) {
        return Err(Errno::MemoryAccess);
    }
    Ok(offset)
}

/// Copy `len` bytes out of guest memory.
pub fn read_bytes<T>(caller: &mut Caller<'_, T>, ptr: i32, len: i32) -> GuestResult<Vec<u8>> {
    let memory = memory(caller)?;
    let len = len as u32 as usize;
    let offset = checked_span(caller, &memory, ptr, len)?;
    let mut buf = vec![0u8; len];
    memory
        .read(&*caller, offset, &mut buf)
        .map_err(|_| Errno::MemoryAccess)?;
    Ok(buf)
}

/// Read a UTF-8 string out of guest memory.
pub fn read_string<T>(caller: &mut Caller<'_, T>, ptr: i32, len: i32) -> GuestResult<String> {
    let bytes = read_bytes(caller, ptr, len)?;
    String::from_utf8(bytes).map_err(|_| Errno::InvalidUtf8)
}

/// Copy `data` into guest memory at `ptr`.
pub fn write_bytes<T>(caller: &mut Caller<'_, T>, ptr: i32, data: &[u8]) -> GuestResult<()> {
    let memory = memory(caller)?;
    let offset = checked_span(caller, &memory, ptr, data.len())?;
    memory
        .write(&mut *caller, offset, data)
        .map_err(|_| Errno::MemoryAccess)
}

/// Write a little-endian `u32` at `ptr`.
pub fn write_u32<T>(caller: &mut Caller<'_, T>, ptr: i32, value: u32) -> GuestResult<()> {
    write_bytes(caller, ptr, &value.to_le_bytes())
}

/// Copy `data` into a guest buffer of `buf_len` bytes.
///
/// Fails with [`Errno::BufferTooSmall`] when the buffer cannot hold `data`.
pub fn write_into<T>(
    caller: &mut Caller<'_, T>,
    buf_ptr: i32,
    buf_len: i32,
    data: &[u8],
) -> GuestResult<()> {
    if (buf_len as u32 as usize) < data.len() {
        return Err(Errno::BufferTooSmall);
    }
    write_bytes(caller, buf_ptr, data)
}

/// Write the byte length of `data` as a `u32` at `size_ptr`.
pub fn write_size<T>(caller: &mut Caller<'_, T>, size_ptr: i32, data: &[u8]) -> GuestResult<()> {
    let size = u32::try_from(data.len()).map_err(|_| Errno::InvalidArgument)?;
    write_u32(caller, size_ptr, size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(status(Ok(())), 0);
        assert_eq!(status(Err(Errno::Eof)), 9);
        assert_eq!(i32::from(Errno::UnsupportedEvent), 14);
    }
}
