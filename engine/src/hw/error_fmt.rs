//! HAL status codes and their display form.

const fn tag(code: &[u8; 4]) -> i32 {
    i32::from_be_bytes(*code)
}

pub const UNSPECIFIED: i32 = tag(b"what");
pub const NOT_RUNNING: i32 = tag(b"stop");
pub const UNKNOWN_PROPERTY: i32 = tag(b"who?");
pub const BAD_PROPERTY_SIZE: i32 = tag(b"!siz");
pub const ILLEGAL_OPERATION: i32 = tag(b"nope");
pub const BAD_OBJECT: i32 = tag(b"!obj");
pub const BAD_DEVICE: i32 = tag(b"!dev");
pub const BAD_STREAM: i32 = tag(b"!str");
pub const UNSUPPORTED_OPERATION: i32 = tag(b"unop");
pub const UNSUPPORTED_FORMAT: i32 = tag(b"!dat");

/// Format a HAL status code into a human-readable string.
///
/// Known codes are returned with their symbolic name; unknown codes are
/// rendered as decimal plus hex, with the four-character form when printable.
pub fn os_status(code: i32) -> String {
    let name = match code {
        0 => return "kAudioHardwareNoError (0)".to_string(),
        UNSPECIFIED => "kAudioHardwareUnspecifiedError",
        NOT_RUNNING => "kAudioHardwareNotRunningError",
        UNKNOWN_PROPERTY => "kAudioHardwareUnknownPropertyError",
        BAD_PROPERTY_SIZE => "kAudioHardwareBadPropertySizeError",
        ILLEGAL_OPERATION => "kAudioHardwareIllegalOperationError",
        BAD_OBJECT => "kAudioHardwareBadObjectError",
        BAD_DEVICE => "kAudioHardwareBadDeviceError",
        BAD_STREAM => "kAudioHardwareBadStreamError",
        UNSUPPORTED_OPERATION => "kAudioHardwareUnsupportedOperationError",
        UNSUPPORTED_FORMAT => "kAudioDeviceUnsupportedFormatError",
        other => {
            return match fourcc(other) {
                Some(tag) => format!("OSStatus '{tag}' ({other:#X})"),
                None => format!("OSStatus {other} ({other:#X})"),
            };
        }
    };
    match fourcc(code) {
        Some(tag) => format!("{name} ('{tag}')"),
        None => name.to_string(),
    }
}

fn fourcc(code: i32) -> Option<String> {
    let bytes = code.to_be_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        Some(bytes.iter().map(|b| *b as char).collect())
    } else {
        None
    }
}
