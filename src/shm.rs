//! Named shared-memory frame arrays.
//!
//! An array lives in a POSIX shared memory object named
//! `/lvsa.<namespace>.<array>`: a fixed 64 byte header followed by one frame.
//! The producer publishes frames under a seqlock (`seq` is odd while a frame
//! is being written), so readers can detect and drop torn copies.

use crate::{Depth, DisplayError};
use log::{debug, warn};
use std::{
    ffi::CString,
    fmt, io, ptr,
    sync::atomic::{fence, AtomicU32, AtomicU64, Ordering},
};

pub const MAGIC: u32 = 0x4153_564c;
pub const LAYOUT_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 64;

#[repr(C)]
struct Header {
    magic: u32,
    version: u32,
    width: u32,
    height: u32,
    depth: u32,
    alive: AtomicU32,
    seq: AtomicU64,
    frames: AtomicU64,
    created_ns: i64,
    payload_len: u64,
}

const _: () = assert!(std::mem::size_of::<Header>() <= HEADER_LEN);

/// Identifies a shared array by (namespace, array-name).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct SharedArrayHandle {
    pub namespace: String,
    pub name: String,
}

impl SharedArrayHandle {
    pub fn new(namespace: &str, name: &str) -> Result<Self, DisplayError> {
        for part in [namespace, name] {
            if part.is_empty() || part.contains(['/', '\0']) {
                return Err(DisplayError::InvalidArrayName(format!("{namespace}@{name}")));
            }
        }
        let handle = Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        if handle.object_name().len() > 255 {
            return Err(DisplayError::InvalidArrayName(handle.to_string()));
        }
        Ok(handle)
    }

    /// POSIX shared memory object name.
    pub fn object_name(&self) -> String {
        format!("/lvsa.{}.{}", self.namespace, self.name)
    }

    fn c_name(&self) -> CString {
        // components are checked for NUL in `new`
        CString::new(self.object_name()).unwrap_or_default()
    }

    fn not_found(&self) -> DisplayError {
        DisplayError::ArrayNotFound {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for SharedArrayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.namespace, self.name)
    }
}

/// Metadata read from an array header.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ArrayInfo {
    pub width: usize,
    pub height: usize,
    pub depth: Depth,
    pub frames: u64,
    pub alive: bool,
    pub created_ns: i64,
}

impl ArrayInfo {
    pub fn frame_len(&self) -> usize {
        self.width * self.height * self.depth.bytes()
    }
}

/// An mmap'd region, unmapped on drop.
struct Mapping {
    ptr: *mut u8,
    len: usize,
    dev: libc::dev_t,
    ino: libc::ino_t,
}

impl Mapping {
    fn header(&self) -> &Header {
        // SAFETY: every mapping is at least HEADER_LEN bytes and page aligned.
        unsafe { &*(self.ptr as *const Header) }
    }

    fn payload(&self) -> *mut u8 {
        // SAFETY: HEADER_LEN is within the mapping.
        unsafe { self.ptr.add(HEADER_LEN) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr/len come from a successful mmap.
        let res = unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.len) };
        if res != 0 {
            warn!("munmap failed: {}", io::Error::last_os_error());
        }
    }
}

fn map_fd(fd: libc::c_int, len: usize, writable: bool) -> io::Result<Mapping> {
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: fd is open, st is a valid out pointer.
    if unsafe { libc::fstat(fd, &mut st) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let prot = if writable {
        libc::PROT_READ | libc::PROT_WRITE
    } else {
        libc::PROT_READ
    };
    // SAFETY: mapping a shared object we hold an fd to.
    let ptr = unsafe { libc::mmap(ptr::null_mut(), len, prot, libc::MAP_SHARED, fd, 0) };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(Mapping {
        ptr: ptr as *mut u8,
        len,
        dev: st.st_dev,
        ino: st.st_ino,
    })
}

/// (dev, ino) of the object currently linked under `name`, if any.
fn linked_identity(name: &CString) -> Option<(libc::dev_t, libc::ino_t)> {
    // SAFETY: name is a valid C string.
    let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDONLY, 0) };
    if fd < 0 {
        return None;
    }
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: fd was just opened.
    let ok = unsafe { libc::fstat(fd, &mut st) } == 0;
    unsafe { libc::close(fd) };
    ok.then_some((st.st_dev, st.st_ino))
}

/// Producer side of a shared array.
pub struct SharedArrayWriter {
    handle: SharedArrayHandle,
    c_name: CString,
    map: Mapping,
    info: ArrayInfo,
}

// The mapping is owned exclusively by the writer.
unsafe impl Send for SharedArrayWriter {}

impl SharedArrayWriter {
    /// Create (or replace) the array. A stale object of the same name is
    /// unlinked first; readers still attached to it see it vanish.
    pub fn create(
        handle: SharedArrayHandle,
        width: usize,
        height: usize,
        depth: Depth,
    ) -> Result<Self, DisplayError> {
        let payload_len = width * height * depth.bytes();
        if width == 0 || height == 0 || width > u32::MAX as usize || height > u32::MAX as usize {
            return Err(DisplayError::InvalidDimensions {
                len: payload_len,
                width,
                height,
                depth: depth.bytes(),
            });
        }
        let c_name = handle.c_name();
        let total = HEADER_LEN + payload_len;

        // SAFETY: plain libc calls on a validated name; every error is checked.
        let map = unsafe {
            libc::shm_unlink(c_name.as_ptr());
            let fd = libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o644,
            );
            if fd < 0 {
                return Err(io::Error::last_os_error().into());
            }
            if libc::ftruncate(fd, total as libc::off_t) != 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
                return Err(err.into());
            }
            let map = map_fd(fd, total, true);
            libc::close(fd);
            match map {
                Ok(map) => map,
                Err(e) => {
                    libc::shm_unlink(c_name.as_ptr());
                    return Err(e.into());
                }
            }
        };

        let created_ns = time::OffsetDateTime::now_utc().unix_timestamp_nanos() as i64;
        // SAFETY: the fresh mapping is zeroed and nobody reads it until magic is set.
        unsafe {
            ptr::write(
                map.ptr as *mut Header,
                Header {
                    magic: 0,
                    version: LAYOUT_VERSION,
                    width: width as u32,
                    height: height as u32,
                    depth: depth as u32,
                    alive: AtomicU32::new(1),
                    seq: AtomicU64::new(0),
                    frames: AtomicU64::new(0),
                    created_ns,
                    payload_len: payload_len as u64,
                },
            );
            fence(Ordering::Release);
            ptr::write_volatile(map.ptr as *mut u32, MAGIC);
        }
        debug!("created shared array {handle} ({width}x{height}x{})", depth.bytes());

        Ok(Self {
            info: ArrayInfo {
                width,
                height,
                depth,
                frames: 0,
                alive: true,
                created_ns,
            },
            handle,
            c_name,
            map,
        })
    }

    pub fn handle(&self) -> &SharedArrayHandle {
        &self.handle
    }

    pub fn info(&self) -> ArrayInfo {
        ArrayInfo {
            frames: self.map.header().frames.load(Ordering::Relaxed),
            ..self.info
        }
    }

    /// Publish one frame.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<(), DisplayError> {
        if frame.len() != self.info.frame_len() {
            return Err(DisplayError::InvalidDimensions {
                len: frame.len(),
                width: self.info.width,
                height: self.info.height,
                depth: self.info.depth.bytes(),
            });
        }
        let header = self.map.header();
        let seq = header.seq.load(Ordering::Relaxed);
        header.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        // SAFETY: the payload region holds exactly frame_len bytes.
        unsafe { ptr::copy_nonoverlapping(frame.as_ptr(), self.map.payload(), frame.len()) };
        header.seq.store(seq.wrapping_add(2), Ordering::Release);
        header.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for SharedArrayWriter {
    fn drop(&mut self) {
        self.map.header().alive.store(0, Ordering::Release);
        if linked_identity(&self.c_name) == Some((self.map.dev, self.map.ino)) {
            // SAFETY: unlinking the object we created.
            unsafe { libc::shm_unlink(self.c_name.as_ptr()) };
        }
        debug!("released shared array {}", self.handle);
    }
}

/// Result of one read attempt.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReadOutcome {
    /// A new frame was copied; carries its sequence number.
    Frame(u64),
    /// Nothing new since the last frame.
    Unchanged,
    /// The producer was writing; try again next tick.
    Busy,
    /// The producer released the array.
    Gone,
}

/// Viewer side of a shared array.
pub struct SharedArrayReader {
    handle: SharedArrayHandle,
    c_name: CString,
    map: Mapping,
    info: ArrayInfo,
}

impl SharedArrayReader {
    /// Attach to an existing array. An array whose header is not yet
    /// initialised counts as not found.
    pub fn open(handle: SharedArrayHandle) -> Result<Self, DisplayError> {
        let c_name = handle.c_name();
        // SAFETY: c_name is a valid C string.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::ENOENT) => handle.not_found(),
                _ => err.into(),
            });
        }
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: fd is open.
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err.into());
        }
        let size = st.st_size as usize;
        if size < HEADER_LEN {
            unsafe { libc::close(fd) };
            return Err(handle.not_found());
        }
        let map = map_fd(fd, size, false);
        unsafe { libc::close(fd) };
        let map = map?;

        // SAFETY: the mapping covers the header.
        let magic = unsafe { ptr::read_volatile(map.ptr as *const u32) };
        fence(Ordering::Acquire);
        if magic != MAGIC {
            return Err(handle.not_found());
        }
        let header = map.header();
        if header.version != LAYOUT_VERSION {
            return Err(DisplayError::ArrayLayout(format!(
                "{handle}: layout version {}",
                header.version
            )));
        }
        let depth = Depth::from_bytes(header.depth as usize).ok_or_else(|| {
            DisplayError::ArrayLayout(format!("{handle}: depth {}", header.depth))
        })?;
        let info = ArrayInfo {
            width: header.width as usize,
            height: header.height as usize,
            depth,
            frames: header.frames.load(Ordering::Relaxed),
            alive: header.alive.load(Ordering::Acquire) != 0,
            created_ns: header.created_ns,
        };
        if info.frame_len() as u64 != header.payload_len || HEADER_LEN + info.frame_len() > size {
            return Err(DisplayError::ArrayLayout(format!(
                "{handle}: payload does not fit {size} bytes"
            )));
        }
        Ok(Self {
            handle,
            c_name,
            map,
            info,
        })
    }

    pub fn handle(&self) -> &SharedArrayHandle {
        &self.handle
    }

    pub fn info(&self) -> ArrayInfo {
        let header = self.map.header();
        ArrayInfo {
            frames: header.frames.load(Ordering::Relaxed),
            alive: header.alive.load(Ordering::Acquire) != 0,
            ..self.info
        }
    }

    /// Copy the current frame into `out` if its sequence differs from `last`.
    pub fn read_frame(&self, last: Option<u64>, out: &mut Vec<u8>) -> ReadOutcome {
        let header = self.map.header();
        if header.alive.load(Ordering::Acquire) == 0 {
            return ReadOutcome::Gone;
        }
        let seq = header.seq.load(Ordering::Acquire);
        if seq % 2 == 1 {
            return ReadOutcome::Busy;
        }
        if seq == 0 || last == Some(seq) {
            return ReadOutcome::Unchanged;
        }
        let len = self.info.frame_len();
        out.resize(len, 0);
        // SAFETY: the payload region holds len bytes; torn copies are rejected below.
        unsafe { ptr::copy_nonoverlapping(self.map.payload(), out.as_mut_ptr(), len) };
        fence(Ordering::Acquire);
        if header.seq.load(Ordering::Relaxed) != seq {
            return ReadOutcome::Busy;
        }
        ReadOutcome::Frame(seq)
    }

    /// False once the name no longer refers to the object we mapped.
    pub fn is_linked(&self) -> bool {
        linked_identity(&self.c_name) == Some((self.map.dev, self.map.ino))
    }
}
