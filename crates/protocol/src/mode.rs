//! Permission-bit comparison shared by the orchestrator and the dispatcher.
//!
//! The desired mode is authoritative over the permission bits (`0o777`).
//! Special bits (setuid, setgid, sticky) are compared only when the desired
//! mode sets them, and are otherwise left as found on the host.

/// `rwx` bits for user, group and other.
pub const PERMISSION_BITS: u32 = 0o777;

/// setuid, setgid and sticky.
pub const SPECIAL_BITS: u32 = 0o7000;

/// Every bit a scenario may express.
pub const MODE_BITS: u32 = PERMISSION_BITS | SPECIAL_BITS;

/// Bits of `current` that `desired` has an opinion about.
fn considered(desired: u32) -> u32 {
    PERMISSION_BITS | (desired & SPECIAL_BITS)
}

/// Whether `current` (a full `st_mode`) satisfies `desired`.
pub fn mode_matches(desired: u32, current: u32) -> bool {
    let mask = considered(desired);
    current & mask == desired & mask
}

/// Mode to apply so that `current` satisfies `desired` without clobbering
/// special bits the desired mode leaves unset. File type bits are dropped.
pub fn merge_mode(desired: u32, current: u32) -> u32 {
    let mask = considered(desired);
    (current & MODE_BITS & !mask) | (desired & mask)
}

/// Parse octal permission text such as `644`, `0644` or `0o644`.
pub fn parse_mode(text: &str) -> Option<u32> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0o")
        .or_else(|| trimmed.strip_prefix("0O"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return None;
    }
    let mode = u32::from_str_radix(digits, 8).ok()?;
    (mode <= MODE_BITS).then_some(mode)
}

/// Render the scenario-visible part of a mode as four octal digits.
pub fn format_mode(mode: u32) -> String {
    format!("{:04o}", mode & MODE_BITS)
}
