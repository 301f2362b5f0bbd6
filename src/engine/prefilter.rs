//! Vectorscan prefilter database for bulk candidate scanning.
//!
//! The prefilter database holds the union of all per-call-site prefilter
//! patterns, each carrying its dense pattern id. One block-mode scan of a log
//! line yields `(id, from, to)` candidate reports which the engine then
//! confirms with the per-call-site PCRE2 patterns.
//!
//! Patterns are compiled with `HS_FLAG_SOM_LEFTMOST` so the callback observes
//! true start-of-match offsets; the scanner may report several spans per
//! `(id, from)` and the engine decides which to keep.
//!
//! # Invariants and safety
//! - Compiled databases are immutable and may be shared across threads.
//! - Each scanning thread must use its own `hs_scratch_t` ([`Scratch`]).
//! - Match callbacks must never panic or unwind across the FFI boundary.
//! - Callback `ctx` pointers are valid only for the duration of a scan.
//! - Scan buffers must fit in `u32`; longer lines return an error.

use std::ffi::CString;
use std::mem::MaybeUninit;
use std::ptr;

use libc::{c_char, c_int, c_uint, c_void};
use vectorscan_rs_sys as vs;

/// One raw candidate reported by the prefilter scan.
///
/// Offsets are byte offsets into the scanned body; `from..to` is half-open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ScanReport {
    pub(crate) id: u32,
    pub(crate) from: u64,
    pub(crate) to: u64,
}

/// Compiled Vectorscan block-mode database over all prefilter patterns.
///
/// The database is immutable after compilation and can be shared across
/// threads, but each thread must allocate its own [`Scratch`].
pub(crate) struct PrefilterDb {
    db: *mut vs::hs_database_t,
}

// Safe because hs_database_t is immutable after compilation, and we require per-thread scratch.
unsafe impl Send for PrefilterDb {}
unsafe impl Sync for PrefilterDb {}

impl Drop for PrefilterDb {
    fn drop(&mut self) {
        unsafe {
            if !self.db.is_null() {
                vs::hs_free_database(self.db);
            }
        }
    }
}

/// Per-thread Vectorscan scratch space bound to a specific database.
///
/// Must only be used with the database it was allocated for and never from
/// two threads at once. Dropping it releases the underlying `hs_scratch_t`.
pub struct Scratch {
    scratch: *mut vs::hs_scratch_t,
}

impl Drop for Scratch {
    fn drop(&mut self) {
        unsafe {
            if !self.scratch.is_null() {
                vs::hs_free_scratch(self.scratch);
            }
        }
    }
}

impl PrefilterDb {
    /// Compiles `patterns` (with their dense ids) into a block-mode database.
    ///
    /// Every pattern is compiled with `HS_FLAG_SOM_LEFTMOST`.
    pub(crate) fn compile(patterns: &[CString], ids: &[u32]) -> Result<Self, String> {
        if patterns.is_empty() {
            return Err("no prefilter patterns to compile".to_string());
        }

        let expr_ptrs: Vec<*const c_char> = patterns.iter().map(|p| p.as_ptr()).collect();
        let flags: Vec<c_uint> = vec![vs::HS_FLAG_SOM_LEFTMOST as c_uint; patterns.len()];
        let ids: Vec<c_uint> = ids.iter().map(|&id| id as c_uint).collect();

        let platform = populate_platform();

        let mut db: *mut vs::hs_database_t = ptr::null_mut();
        let mut compile_err: *mut vs::hs_compile_error_t = ptr::null_mut();
        let rc = unsafe {
            vs::hs_compile_multi(
                expr_ptrs.as_ptr(),
                flags.as_ptr(),
                ids.as_ptr(),
                expr_ptrs.len() as c_uint,
                vs::HS_MODE_BLOCK as c_uint,
                &platform as *const vs::hs_platform_info_t,
                &mut db as *mut *mut vs::hs_database_t,
                &mut compile_err as *mut *mut vs::hs_compile_error_t,
            )
        };

        if rc != vs::HS_SUCCESS as c_int {
            return Err(take_compile_error(compile_err, rc));
        }

        Ok(Self { db })
    }

    /// Restores a database from `hs_serialize_database` output.
    pub(crate) fn deserialize(bytes: &[u8]) -> Result<Self, String> {
        let mut db: *mut vs::hs_database_t = ptr::null_mut();
        let rc = unsafe {
            vs::hs_deserialize_database(
                bytes.as_ptr().cast::<c_char>(),
                bytes.len(),
                &mut db as *mut *mut vs::hs_database_t,
            )
        };
        if rc != vs::HS_SUCCESS as c_int || db.is_null() {
            return Err(format!("hs_deserialize_database failed: rc={rc}"));
        }
        Ok(Self { db })
    }

    /// Serializes the database for on-disk caching.
    pub(crate) fn serialize(&self) -> Result<Vec<u8>, String> {
        let mut bytes_ptr: *mut c_char = ptr::null_mut();
        let mut bytes_len: usize = 0;
        let rc = unsafe {
            vs::hs_serialize_database(
                self.db,
                &mut bytes_ptr as *mut *mut c_char,
                &mut bytes_len as *mut usize,
            )
        };
        if rc != vs::HS_SUCCESS as c_int || bytes_ptr.is_null() || bytes_len == 0 {
            if !bytes_ptr.is_null() {
                unsafe { libc::free(bytes_ptr.cast()) };
            }
            return Err(format!("hs_serialize_database failed: rc={rc}"));
        }
        let out =
            unsafe { std::slice::from_raw_parts(bytes_ptr.cast::<u8>(), bytes_len) }.to_vec();
        unsafe { libc::free(bytes_ptr.cast()) };
        Ok(out)
    }

    /// Allocates a new scratch space bound to this database.
    ///
    /// Callers reuse the returned scratch across scans on the same thread.
    pub(crate) fn alloc_scratch(&self) -> Result<Scratch, String> {
        let mut scratch: *mut vs::hs_scratch_t = ptr::null_mut();
        let rc =
            unsafe { vs::hs_alloc_scratch(self.db, &mut scratch as *mut *mut vs::hs_scratch_t) };
        if rc != vs::HS_SUCCESS as c_int {
            return Err(format!("hs_alloc_scratch failed: rc={rc}"));
        }
        Ok(Scratch { scratch })
    }

    /// Scans `hay` and appends every reported candidate to `reports`.
    ///
    /// `scratch` must be allocated for this database and must not be used
    /// concurrently.
    pub(crate) fn scan(
        &self,
        hay: &[u8],
        scratch: &mut Scratch,
        reports: &mut Vec<ScanReport>,
    ) -> Result<(), String> {
        let len_u32: c_uint = hay
            .len()
            .try_into()
            .map_err(|_| format!("buffer too large for hs_scan: {} bytes", hay.len()))?;

        let mut ctx = ScanCtx {
            reports: reports as *mut Vec<ScanReport>,
            hay_len: len_u32,
        };

        let rc = unsafe {
            vs::hs_scan(
                self.db,
                hay.as_ptr().cast::<c_char>(),
                len_u32,
                0,
                scratch.scratch,
                Some(on_match),
                (&mut ctx as *mut ScanCtx).cast::<c_void>(),
            )
        };

        if rc == vs::HS_SUCCESS as c_int || rc == vs::HS_SCAN_TERMINATED as c_int {
            Ok(())
        } else {
            Err(format!("hs_scan failed: rc={rc}"))
        }
    }
}

#[repr(C)]
/// Callback context for `hs_scan`.
///
/// Safety invariants:
/// - `reports` points to a live `Vec<ScanReport>` for the duration of the
///   scan and is not accessed concurrently.
/// - `hay_len` matches the length passed to `hs_scan`.
struct ScanCtx {
    reports: *mut Vec<ScanReport>,
    hay_len: u32,
}

/// Prefilter match callback: records every `(id, from, to)` report.
///
/// # Safety
/// - `ctx` must be non-null and point to a valid `ScanCtx`.
/// - This callback must never panic or unwind across the FFI boundary.
extern "C" fn on_match(id: c_uint, from: u64, to: u64, _flags: c_uint, ctx: *mut c_void) -> c_int {
    // Absolutely no panics across FFI.
    if ctx.is_null() {
        return 0;
    }
    let c = unsafe { &mut *(ctx as *mut ScanCtx) };
    if to > u64::from(c.hay_len) || from > to {
        return 0;
    }
    // SAFETY: `reports` is valid for the duration of the scan and not used concurrently.
    let reports = unsafe { &mut *c.reports };
    reports.push(ScanReport { id, from, to });
    0
}

/// Queries `hs_expression_info` for the minimum match width of `pattern`.
///
/// Returns the width together with the NUL-terminated pattern ready for
/// compilation. Errors if the pattern contains NUL bytes or Vectorscan
/// rejects the expression.
pub(crate) fn expression_min_width(pattern: &str) -> Result<(u32, CString), String> {
    let c_pat = CString::new(pattern).map_err(|_| "pattern contains NUL byte".to_string())?;

    let mut info_ptr: *mut vs::hs_expr_info_t = ptr::null_mut();
    let mut compile_err: *mut vs::hs_compile_error_t = ptr::null_mut();
    let rc = unsafe {
        vs::hs_expression_info(
            c_pat.as_ptr(),
            vs::HS_FLAG_SOM_LEFTMOST as c_uint,
            &mut info_ptr,
            &mut compile_err,
        )
    };
    if rc != vs::HS_SUCCESS as c_int {
        return Err(take_compile_error(compile_err, rc));
    }
    if info_ptr.is_null() {
        return Err("hs_expression_info returned null info".to_string());
    }

    let min_width = unsafe { (*info_ptr).min_width };
    unsafe {
        // Allocated by the misc allocator; we assume default malloc/free.
        libc::free(info_ptr.cast());
    }

    Ok((min_width, c_pat))
}

fn populate_platform() -> vs::hs_platform_info_t {
    let mut platform = MaybeUninit::<vs::hs_platform_info_t>::zeroed();
    unsafe {
        // Best-effort: if this fails, Vectorscan falls back to defaults.
        let _ = vs::hs_populate_platform(platform.as_mut_ptr());
        platform.assume_init()
    }
}

/// Formats and frees an `hs_compile_error_t`, returning the message.
fn take_compile_error(compile_err: *mut vs::hs_compile_error_t, rc: c_int) -> String {
    unsafe {
        if compile_err.is_null() {
            format!("vectorscan compile failed: rc={rc}")
        } else {
            let msg = if (*compile_err).message.is_null() {
                format!("vectorscan compile failed: rc={rc}")
            } else {
                let cstr = std::ffi::CStr::from_ptr((*compile_err).message);
                format!(
                    "vectorscan compile failed at expression {}: {}",
                    (*compile_err).expression,
                    cstr.to_string_lossy()
                )
            };
            vs::hs_free_compile_error(compile_err);
            msg
        }
    }
}
