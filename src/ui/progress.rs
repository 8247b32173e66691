use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Named progress bars over one `MultiProgress`, so the MAC loop can drive
/// several displays without holding `ProgressBar` handles itself.
pub struct ProgressManager {
    mp: MultiProgress,
    bars: Arc<Mutex<HashMap<String, ProgressBar>>>,
}

impl ProgressManager {
    pub fn new() -> Self {
        Self {
            mp: MultiProgress::new(),
            bars: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn create_bar(
        &self,
        id: &str,
        total: u64,
        template: &str,
        message: &str,
    ) -> Result<(), String> {
        let mut bars = self.bars.lock().map_err(|e| format!("lock error: {e}"))?;
        if bars.contains_key(id) {
            return Err(format!("progress bar '{id}' already exists"));
        }

        let pb = self.mp.add(ProgressBar::new(total));
        pb.set_style(
            ProgressStyle::default_bar()
                .template(template)
                .map_err(|e| format!("bad template: {e}"))?
                .progress_chars("█▉▊▋▌▍▎▏ "),
        );
        pb.set_message(message.to_string());

        bars.insert(id.to_string(), pb);
        Ok(())
    }

    pub fn set_position(&self, id: &str, pos: u64) -> Result<(), String> {
        self.with_bar(id, |pb| pb.set_position(pos))
    }

    pub fn inc(&self, id: &str, value: u64) -> Result<(), String> {
        self.with_bar(id, |pb| pb.inc(value))
    }

    pub fn set_message(&self, id: &str, message: &str) -> Result<(), String> {
        self.with_bar(id, |pb| pb.set_message(message.to_string()))
    }

    pub fn finish(&self, id: &str, message: &str) -> Result<(), String> {
        self.with_bar(id, |pb| pb.finish_with_message(message.to_string()))
    }

    pub fn finish_all(&self) {
        if let Ok(mut bars) = self.bars.lock() {
            for (_, pb) in bars.drain() {
                pb.finish();
            }
        }
    }

    fn with_bar(&self, id: &str, f: impl FnOnce(&ProgressBar)) -> Result<(), String> {
        let bars = self.bars.lock().map_err(|e| format!("lock error: {e}"))?;
        match bars.get(id) {
            Some(pb) => {
                f(pb);
                Ok(())
            }
            None => Err(format!("progress bar '{id}' not found")),
        }
    }
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

pub mod templates {
    pub const RECORDING: &str =
        "REC  [{bar:30.red}] {percent}% ({pos}/{len} samples) {msg}";
    pub const SENDER: &str =
        "SEND [{bar:30.cyan}] {percent}% ({pos}/{len} frames) {msg}";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_lifecycle() {
        let manager = ProgressManager::new();
        manager
            .create_bar("recording", 100, templates::RECORDING, "slot 0")
            .unwrap();
        assert!(manager
            .create_bar("recording", 100, templates::RECORDING, "dup")
            .is_err());

        manager.set_position("recording", 40).unwrap();
        manager.inc("recording", 10).unwrap();
        manager.set_message("recording", "slot 1").unwrap();
        assert!(manager.set_position("missing", 1).is_err());

        manager.finish("recording", "done").unwrap();
        manager.finish_all();
    }
}
