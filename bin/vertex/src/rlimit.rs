//! `RLIMIT_NOFILE` startup check (§6): warns rather than refusing to start,
//! since the limit is advisory from this process's point of view.

/// Every spliced connection holds two file descriptors (client + upstream)
/// plus whatever the REST listener and directory/contract clients need; this
/// is a rough floor, not an exact accounting.
const FDS_PER_CONNECTION: u64 = 2;
const RESERVED_FDS: u64 = 32;

pub fn warn_if_too_low(expected_connections: u64) {
    let mut limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    // SAFETY: `limit` is a valid, fully-initialized `rlimit` the kernel
    // writes into; `RLIMIT_NOFILE` is a well-known resource constant.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    if rc != 0 {
        tracing::warn!("could not read RLIMIT_NOFILE: {}", std::io::Error::last_os_error());
        return;
    }

    let wanted = expected_connections.saturating_mul(FDS_PER_CONNECTION).saturating_add(RESERVED_FDS);
    if limit.rlim_cur < wanted {
        tracing::warn!(
            current = limit.rlim_cur,
            wanted,
            "configured file-descriptor limit looks low for the expected connection volume"
        );
    }
}
