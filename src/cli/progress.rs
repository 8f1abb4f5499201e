//! CLI progress display for the route search

use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar counting finished origin cities
pub fn create_progress_bar(origins: u64) -> ProgressBar {
    let pb = ProgressBar::new(origins);
    if let Ok(style) = ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} origins {msg}",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// Progress bar plus the message shown when it starts
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    pub fn new(origins: u64, message: &str) -> Self {
        let pb = create_progress_bar(origins);
        eprintln!("{message}");
        Self { pb }
    }

    /// Advance by one finished origin, showing where it ended up
    pub fn origin_done(&self, origin: &str, destination: Option<&str>) {
        match destination {
            Some(country) => self.pb.set_message(format!("{origin} -> {country}")),
            None => self.pb.set_message(format!("{origin}: exhausted")),
        }
        self.pb.inc(1);
    }

    pub fn finish(&self) {
        self.pb.finish_with_message("✅ Route search completed");
    }
}
