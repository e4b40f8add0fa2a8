//! Cache-line flush primitives for byte-addressable persistent memory.
//!
//! These are plain `clflush`/`mfence` wrappers; write-latency throttling is
//! left to the platform. Callers that run in DRAM simply skip the calls, so
//! none of the flush paths are load-bearing for correctness.

#![expect(unsafe_code, reason = "cache flushes take raw address ranges")]

const CACHE_LINE_SIZE: usize = 64;

/// Flush every cache line overlapping the memory occupied by `data`.
pub fn clflush_slice<T>(data: &[T]) {
    let len = size_of_val(data);
    if len == 0 {
        return;
    }
    clflush_range(data.as_ptr().cast(), len);
}

/// Flush every cache line overlapping the memory occupied by `value`.
pub fn clflush_value<T>(value: &T) {
    clflush_range((value as *const T).cast(), size_of::<T>());
}

/// Order preceding flushes before subsequent stores.
#[inline]
pub fn mfence() {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: `_mm_mfence` has no memory-safety preconditions.
    unsafe {
        core::arch::x86_64::_mm_mfence();
    }
}

#[cfg(target_arch = "x86_64")]
fn clflush_range(data: *const u8, len: usize) {
    let start = data as usize & !(CACHE_LINE_SIZE - 1);
    let end = data as usize + len;
    let mut line = start;
    while line < end {
        // SAFETY: every flushed line overlaps the caller's valid range
        // (`data..data + len`), and `_mm_clflush` only requires the address
        // to be mapped, which holds for any address inside a live object.
        unsafe {
            core::arch::x86_64::_mm_clflush(line as *const u8);
        }
        line += CACHE_LINE_SIZE;
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn clflush_range(_data: *const u8, _len: usize) {}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_is_harmless() {
        let values = vec![3_u64; 1000];
        clflush_slice(&values);
        clflush_value(&values[999]);
        mfence();
        assert!(values.iter().all(|&v| v == 3));
    }

    #[test]
    fn empty_slice_is_fine() {
        clflush_slice::<u64>(&[]);
    }
}
