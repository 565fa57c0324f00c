//! Magic Ring Buffer
//!
//! A FIFO of fixed-size items whose backing memory is mapped twice,
//! back-to-back, in virtual address space. Reads and writes that straddle
//! the logical wrap point land in contiguous virtual memory, so the hot
//! paths are single memcpys and `peek` can hand out one contiguous slice
//! regardless of where the wrap falls.
//!
//! On non-Unix targets the double mapping is replaced by a conventional
//! ring with split copies; `peek` then only exposes the items up to the
//! physical wrap.

use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;
use std::sync::{Mutex, MutexGuard};

use crate::RadioError;

/// Read cursor plus fill level, both in bytes.
///
/// `read_off` stays in `[0, buf_size)`; the write offset is derived as
/// `(read_off + avail) % buf_size`. `avail` never exceeds the logical
/// capacity, which keeps every copy within one mapping length.
struct Cursors {
    read_off: usize,
    avail: usize,
}

/// Single-writer / single-reader FIFO over fixed-size items.
///
/// All operations serialise on an internal mutex, so a producer and a
/// consumer may call into the buffer concurrently. The `peek` guard holds
/// that mutex for its lifetime; a writer blocks until the guard is
/// dropped.
///
/// The item type must be `Copy` with a power-of-two size no larger than
/// the page size, so that items never straddle the mapping boundary.
pub struct MagicBuffer<T: Copy> {
    backing: Backing,
    cursors: Mutex<Cursors>,
    /// Logical capacity in items (as requested at construction)
    buf_len: usize,
    /// Mapped length in bytes, page-granular
    buf_size: usize,
    overwrite: bool,
    _marker: PhantomData<T>,
}

// The raw mapping pointer is only dereferenced under the cursor mutex.
unsafe impl<T: Copy + Send> Send for MagicBuffer<T> {}
unsafe impl<T: Copy + Send> Sync for MagicBuffer<T> {}

impl<T: Copy> MagicBuffer<T> {
    /// Create a buffer holding `len` items.
    ///
    /// With `overwrite` set, writes that do not fit discard the oldest
    /// items instead of short-returning. Fails if the virtual memory
    /// mapping cannot be established.
    pub fn new(len: usize, overwrite: bool) -> Result<Self, RadioError> {
        let item_size = mem::size_of::<T>();
        if len == 0 {
            return Err(RadioError::InvalidConfig(
                "ring buffer length must be non-zero".into(),
            ));
        }
        let page = page_size();
        if !item_size.is_power_of_two() || item_size > page {
            return Err(RadioError::InvalidConfig(format!(
                "item size {} must be a power of two no larger than a page",
                item_size
            )));
        }

        // Round the mapping up to the platform granularity. The logical
        // capacity stays at the requested item count.
        let buf_size = (len * item_size).div_ceil(page) * page;
        let backing = Backing::new(buf_size)?;

        Ok(Self {
            backing,
            cursors: Mutex::new(Cursors {
                read_off: 0,
                avail: 0,
            }),
            buf_len: len,
            buf_size,
            overwrite,
            _marker: PhantomData,
        })
    }

    /// Append up to `src.len()` items; returns the count actually written.
    ///
    /// In overwrite mode all items are written, discarding the oldest as
    /// needed (if `src` is longer than the buffer, only its newest
    /// `buf_len` items survive).
    pub fn write(&self, src: &[T]) -> usize {
        let item_size = mem::size_of::<T>();
        let requested = src.len();
        let mut cur = lock(&self.cursors);

        // Overwrite mode accepts everything; only the newest buf_len items
        // can survive, so older source items never touch the storage.
        let mut src = src;
        if self.overwrite && src.len() > self.buf_len {
            src = &src[src.len() - self.buf_len..];
        }

        let space_items = self.buf_len - cur.avail / item_size;
        let n = if self.overwrite {
            let shortfall = src.len().saturating_sub(space_items);
            if shortfall > 0 {
                // Drop the oldest items to make room
                cur.read_off = (cur.read_off + shortfall * item_size) % self.buf_size;
                cur.avail -= shortfall * item_size;
            }
            src.len()
        } else {
            src.len().min(space_items)
        };

        if n > 0 {
            let write_off = (cur.read_off + cur.avail) % self.buf_size;
            unsafe {
                self.backing
                    .copy_in(write_off, src.as_ptr() as *const u8, n * item_size);
            }
            cur.avail += n * item_size;
        }

        if self.overwrite {
            requested
        } else {
            n
        }
    }

    /// Remove up to `dst.len()` items; returns the count actually read.
    pub fn read(&self, dst: &mut [T]) -> usize {
        let item_size = mem::size_of::<T>();
        let mut cur = lock(&self.cursors);

        let n = dst.len().min(cur.avail / item_size);
        if n == 0 {
            return 0;
        }

        unsafe {
            self.backing
                .copy_out(cur.read_off, dst.as_mut_ptr() as *mut u8, n * item_size);
        }
        cur.read_off = (cur.read_off + n * item_size) % self.buf_size;
        cur.avail -= n * item_size;
        n
    }

    /// Borrow the oldest items as one contiguous slice.
    ///
    /// The returned guard holds the buffer lock: a concurrent `write`
    /// blocks until it is dropped, so keep the borrow short. On targets
    /// without the double mapping the slice stops at the physical wrap.
    pub fn peek(&self) -> Peek<'_, T> {
        Peek {
            guard: lock(&self.cursors),
            backing: &self.backing,
            buf_size: self.buf_size,
            _marker: PhantomData,
        }
    }

    /// Advance the read cursor without copying; returns the count purged.
    pub fn purge(&self, len: usize) -> usize {
        let item_size = mem::size_of::<T>();
        let mut cur = lock(&self.cursors);

        let n = len.min(cur.avail / item_size);
        cur.read_off = (cur.read_off + n * item_size) % self.buf_size;
        cur.avail -= n * item_size;
        n
    }

    /// Reset both cursors; the buffer becomes empty.
    pub fn flush(&self) {
        let mut cur = lock(&self.cursors);
        cur.read_off = 0;
        cur.avail = 0;
    }

    /// Items currently stored
    pub fn data_available(&self) -> usize {
        lock(&self.cursors).avail / mem::size_of::<T>()
    }

    /// Items that can be written without discarding
    pub fn space_available(&self) -> usize {
        self.buf_len - self.data_available()
    }

    /// Physical capacity in items (page-granular, at least `buf_len`)
    pub fn capacity(&self) -> usize {
        self.buf_size / mem::size_of::<T>()
    }

    /// Logical capacity in items, as requested at construction
    pub fn buf_len(&self) -> usize {
        self.buf_len
    }
}

/// Guard returned by [`MagicBuffer::peek`]; derefs to the oldest items.
pub struct Peek<'a, T: Copy> {
    guard: MutexGuard<'a, Cursors>,
    backing: &'a Backing,
    buf_size: usize,
    _marker: PhantomData<&'a [T]>,
}

impl<T: Copy> Deref for Peek<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        let (ptr, len_bytes) =
            self.backing
                .contiguous(self.guard.read_off, self.guard.avail, self.buf_size);
        unsafe {
            std::slice::from_raw_parts(ptr as *const T, len_bytes / mem::size_of::<T>())
        }
    }
}

fn lock(m: &Mutex<Cursors>) -> MutexGuard<'_, Cursors> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(unix)]
fn page_size() -> usize {
    // SAFETY: sysconf with a valid name has no preconditions.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(not(unix))]
fn page_size() -> usize {
    // Windows allocation granularity; a conservative constant elsewhere.
    64 * 1024
}

/// Double-mapped storage: one shared memory object of `size` bytes mapped
/// at offsets 0 and `size` of a reserved `2 * size` virtual range.
#[cfg(unix)]
struct Backing {
    base: *mut u8,
    size: usize,
}

#[cfg(unix)]
impl Backing {
    fn new(size: usize) -> Result<Self, RadioError> {
        use std::io;
        use std::ptr;

        unsafe {
            let fd = memfd(size)?;

            // Reserve the double-length window, then map the object twice
            // over it with MAP_FIXED.
            let base = libc::mmap(
                ptr::null_mut(),
                2 * size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if base == libc::MAP_FAILED {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err.into());
            }

            let prot = libc::PROT_READ | libc::PROT_WRITE;
            let flags = libc::MAP_SHARED | libc::MAP_FIXED;
            let lo = libc::mmap(base, size, prot, flags, fd, 0);
            let hi = libc::mmap((base as *mut u8).add(size) as *mut _, size, prot, flags, fd, 0);
            libc::close(fd);

            if lo == libc::MAP_FAILED || hi == libc::MAP_FAILED {
                let err = io::Error::last_os_error();
                libc::munmap(base, 2 * size);
                return Err(err.into());
            }

            Ok(Self {
                base: base as *mut u8,
                size,
            })
        }
    }

    /// Copy `len` bytes into the buffer starting at byte offset `off`.
    /// The second mapping absorbs any wrap, so one memcpy suffices.
    ///
    /// # Safety
    /// `off < size` and `len <= size` must hold.
    unsafe fn copy_in(&self, off: usize, src: *const u8, len: usize) {
        std::ptr::copy_nonoverlapping(src, self.base.add(off), len);
    }

    /// Copy `len` bytes out of the buffer starting at byte offset `off`.
    ///
    /// # Safety
    /// `off < size` and `len <= size` must hold.
    unsafe fn copy_out(&self, off: usize, dst: *mut u8, len: usize) {
        std::ptr::copy_nonoverlapping(self.base.add(off), dst, len);
    }

    /// Largest contiguous readable run at `off`; the double mapping makes
    /// the entire fill level contiguous.
    fn contiguous(&self, off: usize, avail: usize, _buf_size: usize) -> (*const u8, usize) {
        (unsafe { self.base.add(off) } as *const u8, avail)
    }
}

#[cfg(unix)]
impl Drop for Backing {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut _, 2 * self.size);
        }
    }
}

/// Create an anonymous shared memory object of `size` bytes.
#[cfg(target_os = "linux")]
unsafe fn memfd(size: usize) -> Result<libc::c_int, RadioError> {
    use std::io;

    let fd = libc::memfd_create(b"magic-ring\0".as_ptr() as *const libc::c_char, 0);
    if fd < 0 {
        return Err(io::Error::last_os_error().into());
    }
    if libc::ftruncate(fd, size as libc::off_t) != 0 {
        let err = io::Error::last_os_error();
        libc::close(fd);
        return Err(err.into());
    }
    Ok(fd)
}

/// Create an anonymous shared memory object via shm_open on Unix systems
/// without memfd_create. The name is unlinked immediately, so the object
/// lives only as long as the descriptor.
#[cfg(all(unix, not(target_os = "linux")))]
unsafe fn memfd(size: usize) -> Result<libc::c_int, RadioError> {
    use std::ffi::CString;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    let name = format!(
        "/magic-ring-{}-{}",
        libc::getpid(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let cname = CString::new(name).map_err(|_| RadioError::InvalidConfig("shm name".into()))?;

    let fd = libc::shm_open(
        cname.as_ptr(),
        libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
        0o600,
    );
    if fd < 0 {
        return Err(io::Error::last_os_error().into());
    }
    libc::shm_unlink(cname.as_ptr());

    if libc::ftruncate(fd, size as libc::off_t) != 0 {
        let err = io::Error::last_os_error();
        libc::close(fd);
        return Err(err.into());
    }
    Ok(fd)
}

/// Conventional ring storage for targets without the mapping trick.
/// Copies split at the physical wrap; `contiguous` stops there too.
#[cfg(not(unix))]
struct Backing {
    base: *mut u8,
    size: usize,
    layout: std::alloc::Layout,
}

#[cfg(not(unix))]
impl Backing {
    fn new(size: usize) -> Result<Self, RadioError> {
        let layout = std::alloc::Layout::from_size_align(size, 64)
            .map_err(|e| RadioError::InvalidConfig(e.to_string()))?;
        let base = unsafe { std::alloc::alloc_zeroed(layout) };
        if base.is_null() {
            return Err(RadioError::InvalidConfig("allocation failed".into()));
        }
        Ok(Self { base, size, layout })
    }

    unsafe fn copy_in(&self, off: usize, src: *const u8, len: usize) {
        let first = len.min(self.size - off);
        std::ptr::copy_nonoverlapping(src, self.base.add(off), first);
        if first < len {
            std::ptr::copy_nonoverlapping(src.add(first), self.base, len - first);
        }
    }

    unsafe fn copy_out(&self, off: usize, dst: *mut u8, len: usize) {
        let first = len.min(self.size - off);
        std::ptr::copy_nonoverlapping(self.base.add(off), dst, first);
        if first < len {
            std::ptr::copy_nonoverlapping(self.base, dst.add(first), len - first);
        }
    }

    fn contiguous(&self, off: usize, avail: usize, buf_size: usize) -> (*const u8, usize) {
        let len = avail.min(buf_size - off);
        (unsafe { self.base.add(off) } as *const u8, len)
    }
}

#[cfg(not(unix))]
impl Drop for Backing {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.base, self.layout) };
    }
}
