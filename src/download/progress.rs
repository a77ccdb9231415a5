use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;

const BLOB_TEMPLATE: &str =
    "{msg:>14} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg} [{elapsed_precise}] {bytes} ({bytes_per_sec})";
const COUNT_TEMPLATE: &str = "{msg} [{wide_bar:.green/white}] {pos}/{len}";

/// Progress reporting that degrades to nothing off-terminal
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    visible: bool,
}

impl Progress {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            visible: enabled && std::io::stderr().is_terminal(),
        }
    }

    #[must_use]
    pub fn hidden() -> Self {
        Self { visible: false }
    }

    /// Byte progress for one blob; a spinner when the size is unknown
    #[must_use]
    pub fn blob_bar(&self, label: &str, total: Option<u64>) -> ProgressBar {
        if !self.visible {
            return ProgressBar::hidden();
        }

        let bar = match total {
            Some(len) if len > 0 => {
                let bar = ProgressBar::new(len);
                bar.set_style(style(BLOB_TEMPLATE));
                bar
            }
            _ => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(style(SPINNER_TEMPLATE));
                bar
            }
        };
        bar.set_message(label.to_string());
        bar
    }

    /// Item counter, used when walking the catalog
    #[must_use]
    pub fn count_bar(&self, label: &str, len: u64) -> ProgressBar {
        if !self.visible {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        bar.set_style(style(COUNT_TEMPLATE));
        bar.set_message(label.to_string());
        bar
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Format bytes as human-readable string
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_572_864), "1.50 MB");
        assert_eq!(format_bytes(4_920_734_272), "4.58 GB");
    }

    #[test]
    fn test_hidden_bar_still_counts() {
        let bar = Progress::hidden().blob_bar("sha256:abc", Some(100));
        bar.inc(40);
        assert_eq!(bar.position(), 40);
        assert!(bar.is_hidden());
    }

    #[test]
    fn test_templates_parse() {
        for template in [BLOB_TEMPLATE, SPINNER_TEMPLATE, COUNT_TEMPLATE] {
            assert!(ProgressStyle::with_template(template).is_ok());
        }
    }
}
