use std::collections::HashMap;
use std::time::Instant;

use fdsbuilder::builder::ProgressEventListener;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

const TEMPLATE: &str = "{msg} {bar:40.cyan/blue} {pos:>7}/{len:7}";

pub fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(TEMPLATE).unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// One bar per status line, redrawn at most every 100ms.
pub struct ConsoleProgressListener {
    bars: MultiProgress,
    progress_types: HashMap<String, (ProgressBar, Instant)>,
}

impl ConsoleProgressListener {
    pub fn new() -> Self {
        ConsoleProgressListener {
            bars: MultiProgress::new(),
            progress_types: HashMap::new(),
        }
    }
}

impl Default for ConsoleProgressListener {
    fn default() -> Self {
        ConsoleProgressListener::new()
    }
}

impl ProgressEventListener for ConsoleProgressListener {
    fn progress(&mut self, current: u32, total: u32, status: String, finish_status: String) {
        if total == 0 {
            let _ = self.bars.println(status);
            return;
        }
        match self.progress_types.get_mut(&status) {
            Some((bar, last_updated)) => {
                let now = Instant::now();
                if now.duration_since(*last_updated).as_millis() < 100 && current != total {
                    return;
                }
                *last_updated = now;
                bar.set_length(total as u64);
                bar.set_position(current as u64);
                if current == total {
                    bar.finish_with_message(finish_status);
                }
            }
            None => {
                let bar = self.bars.add(ProgressBar::new(total as u64));
                bar.set_style(bar_style());
                bar.set_position(current as u64);
                bar.set_message(status.clone());
                if current == total {
                    bar.finish_with_message(finish_status);
                }
                self.progress_types.insert(status, (bar, Instant::now()));
            }
        }
    }
}
