//! Small helpers shared across the crate.

/// Check whether a string is a well-formed Bluetooth hardware address.
///
/// The expected format is six uppercase hex octets separated by colons,
/// e.g. `"AA:BB:CC:DD:EE:FF"` (the same rule classic platform APIs apply).
#[must_use]
pub fn is_valid_address(address: &str) -> bool {
    let bytes = address.as_bytes();
    if bytes.len() != 17 {
        return false;
    }
    for (i, b) in bytes.iter().enumerate() {
        if i % 3 == 2 {
            if *b != b':' {
                return false;
            }
        } else if !b.is_ascii_hexdigit() || b.is_ascii_lowercase() {
            return false;
        }
    }
    true
}

/// Format a device for display as `"name [address]"`.
///
/// Returns `"-"` when either part is empty, matching what selection lists
/// show for unusable entries.
#[must_use]
pub fn format_device_name(name: &str, address: &str) -> String {
    if name.is_empty() || address.is_empty() {
        "-".to_string()
    } else {
        format!("{name} [{address}]")
    }
}
