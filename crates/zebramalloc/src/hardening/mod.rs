pub mod quarantine;
pub mod self_check;

/// Abort with a diagnostic message to stderr.
/// Used when the heap finds its own bookkeeping corrupted: a slab index in two
/// places at once, a queue overflow, an impossible state transition. Carrying
/// on would make every later report from the heap untrustworthy.
#[cold]
#[inline(never)]
pub fn abort_with_message(msg: &str) -> ! {
    tracing::error!(target: "zebramalloc", "{}", msg.trim_end());
    unsafe {
        // Write directly to stderr fd (2); a subscriber may not be installed.
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        libc::abort();
    }
}
