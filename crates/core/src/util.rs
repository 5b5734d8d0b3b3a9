//! Small formatting helpers for progress reporting

/// Format a byte count with one decimal digit and a binary-magnitude unit
pub fn human_readable_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "kB", "MB", "GB"];
    let mut magnitude = 0;
    let mut scaled = size as f64;
    while scaled >= 1024.0 && magnitude < UNITS.len() - 1 {
        scaled /= 1024.0;
        magnitude += 1;
    }
    format!("{:.1}{}", scaled, UNITS[magnitude])
}

/// Format a duration in seconds as HH:MM:SS
pub fn human_readable_time(seconds: u64) -> String {
    let hrs = seconds / 3600;
    let min = (seconds / 60) % 60;
    let sec = seconds % 60;
    format!("{hrs:02}:{min:02}:{sec:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_readable_size() {
        assert_eq!(human_readable_size(0), "0.0B");
        assert_eq!(human_readable_size(512), "512.0B");
        assert_eq!(human_readable_size(1024), "1.0kB");
        assert_eq!(human_readable_size(1536), "1.5kB");
        assert_eq!(human_readable_size(3 * 1024 * 1024), "3.0MB");
        assert_eq!(human_readable_size(5 * 1024 * 1024 * 1024), "5.0GB");
    }

    #[test]
    fn test_human_readable_time() {
        assert_eq!(human_readable_time(0), "00:00:00");
        assert_eq!(human_readable_time(59), "00:00:59");
        assert_eq!(human_readable_time(61), "00:01:01");
        assert_eq!(human_readable_time(3661), "01:01:01");
        assert_eq!(human_readable_time(90000), "25:00:00");
    }
}
