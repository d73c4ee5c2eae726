use std::io::{self, Write};
use std::time::Instant;

/// Timestamped status lines on stderr. A disabled instance prints nothing.
pub struct ConsoleProgress {
    enabled: bool,
    t0: Instant,
}

impl ConsoleProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
        }
    }

    pub fn quiet() -> Self {
        Self::new(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {}", msg.as_ref());
    }

    pub fn progress(&self, label: &str, current: usize, total: usize) {
        if !self.enabled {
            return;
        }
        let total = total.max(1);
        let current = current.min(total);
        let pct = (current as f64 / total as f64) * 100.0;
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {label} {current}/{total} ({pct:5.1}%)");
    }

    /// One fill key's outcome: `✓ key → value` or `✗ key: reason`.
    pub fn key_result(&self, ok: bool, key: &str, detail: &str, max_chars: usize) {
        let key = clip(key, max_chars);
        let detail = clip(detail, max_chars);
        if ok {
            self.info(format!("  ✓ {key} → {detail}"));
        } else {
            self.info(format!("  ✗ {key}: {detail}"));
        }
    }
}

/// Shortens `s` to at most `max_chars` characters, marking the cut with `…`.
pub fn clip(s: &str, max_chars: usize) -> String {
    let one_line = s.replace('\n', "⏎");
    if max_chars == 0 || one_line.chars().count() <= max_chars {
        return one_line;
    }
    let mut out: String = one_line.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
