use super::options::HwOptions;

pub const FORCE_SIMULATOR_ENV: &str = "IOHAL_FORCE_SIMULATOR";
pub const SETTLE_ATTEMPTS_ENV: &str = "IOHAL_SETTLE_ATTEMPTS";
pub const SETTLE_DELAY_ENV: &str = "IOHAL_SETTLE_DELAY_MS";
pub const STOP_ATTEMPTS_ENV: &str = "IOHAL_STOP_ATTEMPTS";
pub const STOP_DELAY_ENV: &str = "IOHAL_STOP_DELAY_MS";
pub const REFRESH_DEBOUNCE_ENV: &str = "IOHAL_REFRESH_DEBOUNCE_MS";

pub fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| parse_flag(&v))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    let s = value.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "yes" || s == "on"
}

/// Applies `IOHAL_*` overrides on top of already loaded options.
pub fn apply_env_overrides(options: &mut HwOptions) {
    apply_overrides(options, |key| std::env::var(key).ok());
}

fn apply_overrides(options: &mut HwOptions, lookup: impl Fn(&str) -> Option<String>) {
    let number = |key: &str| -> Option<u64> {
        let raw = lookup(key)?;
        match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("ignoring {key}={raw}: not a number");
                None
            }
        }
    };
    if let Some(v) = number(SETTLE_ATTEMPTS_ENV) {
        options.settle.attempts = v as u32;
    }
    if let Some(v) = number(SETTLE_DELAY_ENV) {
        options.settle.delay_ms = v;
    }
    if let Some(v) = number(STOP_ATTEMPTS_ENV) {
        options.stop.attempts = v as u32;
    }
    if let Some(v) = number(STOP_DELAY_ENV) {
        options.stop.delay_ms = v;
    }
    if let Some(v) = number(REFRESH_DEBOUNCE_ENV) {
        options.refresh_debounce_ms = v;
    }
}
