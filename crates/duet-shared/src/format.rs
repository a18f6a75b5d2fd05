//! Human-readable renderings of byte counts and media durations.

use serde::{Deserialize, Serialize};

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

/// Size class used when rendering a byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeUnit {
    Kilobytes,
    Megabytes,
}

impl SizeUnit {
    /// Pick the unit for a byte count: below 1 MiB renders in KB.
    pub fn for_bytes(bytes: u64) -> Self {
        if bytes as f64 >= MIB {
            Self::Megabytes
        } else {
            Self::Kilobytes
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Kilobytes => "KB",
            Self::Megabytes => "MB",
        }
    }

    fn divisor(self) -> f64 {
        match self {
            Self::Kilobytes => KIB,
            Self::Megabytes => MIB,
        }
    }
}

impl std::fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Render `bytes` as a one-decimal number in `unit`, without the label.
pub fn format_in(bytes: u64, unit: SizeUnit) -> String {
    format!("{:.1}", bytes as f64 / unit.divisor())
}

/// Render `bytes` in its natural unit, e.g. `"512.0 KB"` or `"3.4 MB"`.
pub fn format_size(bytes: u64) -> String {
    let unit = SizeUnit::for_bytes(bytes);
    format!("{} {}", format_in(bytes, unit), unit)
}

/// Render a duration in seconds as `mm:ss`. Fractions are truncated.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_sizes_render_in_kilobytes() {
        assert_eq!(format_size(0), "0.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1024 * 1024 - 1), "1024.0 KB");
    }

    #[test]
    fn large_sizes_render_in_megabytes() {
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
    }

    #[test]
    fn explicit_unit_overrides_natural_choice() {
        assert_eq!(format_in(3 * 1024 * 1024, SizeUnit::Kilobytes), "3072.0");
        assert_eq!(format_in(512 * 1024, SizeUnit::Megabytes), "0.5");
    }

    #[test]
    fn durations_render_minutes_and_seconds() {
        assert_eq!(format_duration(0.0), "00:00");
        assert_eq!(format_duration(59.9), "00:59");
        assert_eq!(format_duration(754.2), "12:34");
        assert_eq!(format_duration(f64::NAN), "00:00");
    }
}
