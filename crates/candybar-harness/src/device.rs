#![forbid(unsafe_code)]

//! Stand-in hardware for the demo: a console-backed screen and a keypad
//! driver that replays a fixed key script.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use candybar::{EventSink, InputDriver, InputEvent, IoError, Latch, MonoImage, OutputDevice};
use tracing::info;

/// Renders display frames as boxed text on stdout.
pub struct ConsoleScreen;

impl OutputDevice for ConsoleScreen {
    fn display_data(&self, lines: &[String]) -> Result<(), IoError> {
        let width = lines.iter().map(String::len).max().unwrap_or(0).max(16);
        println!("+{}+", "-".repeat(width + 2));
        for line in lines {
            println!("| {line:<width$} |");
        }
        println!("+{}+", "-".repeat(width + 2));
        Ok(())
    }

    fn display_image(&self, image: &MonoImage) -> Result<(), IoError> {
        println!("[{}x{} bitmap]", image.width(), image.height());
        Ok(())
    }

    fn clear(&self) -> Result<(), IoError> {
        println!("(screen cleared)");
        Ok(())
    }
}

/// A keypad that replays a scripted key sequence from its own thread,
/// exactly the way a matrix-scan driver would push real presses.
pub struct ScriptedKeypad {
    script: Vec<(Duration, String)>,
    played: AtomicBool,
    halt: Latch,
}

impl ScriptedKeypad {
    /// Build a keypad from (delay-before-press, key-name) pairs.
    #[must_use]
    pub fn new<I, S>(script: I) -> Self
    where
        I: IntoIterator<Item = (u64, S)>,
        S: Into<String>,
    {
        Self {
            script: script
                .into_iter()
                .map(|(millis, key)| (Duration::from_millis(millis), key.into()))
                .collect(),
            played: AtomicBool::new(false),
            halt: Latch::new(),
        }
    }

    /// Stop the playback thread early.
    pub fn halt(&self) {
        self.halt.set();
    }
}

impl InputDriver for ScriptedKeypad {
    fn start(&self, sink: Arc<dyn EventSink>) -> Result<(), IoError> {
        // Context switches stop and restart the driver mid-script; the
        // playback runs once, across all of them.
        if self.played.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let script = self.script.clone();
        let halt = self.halt.clone();
        thread::Builder::new()
            .name("scripted-keypad".into())
            .spawn(move || {
                for (delay, key) in script {
                    if halt.wait_timeout(delay) {
                        return;
                    }
                    info!(key = %key, "keypad press");
                    sink.send(InputEvent::new(key));
                }
            })
            .map_err(|e| IoError::device(format!("keypad thread: {e}")))?;
        Ok(())
    }

    fn stop(&self) -> Result<(), IoError> {
        Ok(())
    }
}
