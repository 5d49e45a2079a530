#![forbid(unsafe_code)]

//! Built-in multiplexing ports.
//!
//! Every context owns one [`OutputProxy`] and one [`InputProxy`]. All
//! contexts draw and configure input through their own pair at any time;
//! only the pair belonging to the *current* context is attached, so only
//! its calls reach the one physical screen and dispatcher. The rest cache.
//!
//! - [`OutputProxy`] records the last frame displayed while detached and
//!   replays it on attach, so a switch immediately restores the incoming
//!   context's screen content.
//! - [`InputProxy`] records keymap/streaming/listen configuration while
//!   detached and reprograms the dispatcher with it on attach, so the
//!   incoming context's bindings take effect before the switch returns.
//!
//! Attach and detach are called only by the manager's I/O-attach routine,
//! inside the switching mutex, so the ports never see two concurrent
//! attach sequences.

use std::sync::{Arc, Mutex};

use candybar_core::{
    InputControl, InputPort, IoError, Keymap, MonoImage, OutputDevice, OutputPort, ScreenFrame,
    StreamHandler,
};
use tracing::debug;

use crate::dispatch::InputDispatcher;

// ---------------------------------------------------------------------------
// Output side
// ---------------------------------------------------------------------------

struct OutputState {
    attached: bool,
    cached: Option<ScreenFrame>,
}

/// Per-context output endpoint over the shared physical screen.
pub struct OutputProxy {
    screen: Arc<dyn OutputDevice>,
    state: Mutex<OutputState>,
}

impl OutputProxy {
    /// Create a detached proxy over `screen`.
    #[must_use]
    pub fn new(screen: Arc<dyn OutputDevice>) -> Self {
        Self {
            screen,
            state: Mutex::new(OutputState {
                attached: false,
                cached: None,
            }),
        }
    }
}

impl OutputDevice for OutputProxy {
    fn display_data(&self, lines: &[String]) -> Result<(), IoError> {
        let mut state = self.state.lock().unwrap();
        state.cached = Some(ScreenFrame::Text(lines.to_vec()));
        if state.attached {
            self.screen.display_data(lines)?;
        }
        Ok(())
    }

    fn display_image(&self, image: &MonoImage) -> Result<(), IoError> {
        let mut state = self.state.lock().unwrap();
        state.cached = Some(ScreenFrame::Image(image.clone()));
        if state.attached {
            self.screen.display_image(image)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), IoError> {
        let mut state = self.state.lock().unwrap();
        state.cached = None;
        if state.attached {
            self.screen.clear()?;
        }
        Ok(())
    }
}

impl OutputPort for OutputProxy {
    fn attach(&self) -> Result<(), IoError> {
        let mut state = self.state.lock().unwrap();
        // Replay before flipping the flag: a failed replay leaves the
        // port detached so the switch can roll back cleanly.
        match &state.cached {
            Some(ScreenFrame::Text(lines)) => self.screen.display_data(lines)?,
            Some(ScreenFrame::Image(image)) => self.screen.display_image(image)?,
            None => self.screen.clear()?,
        }
        state.attached = true;
        Ok(())
    }

    fn detach(&self) {
        self.state.lock().unwrap().attached = false;
    }

    fn cached_frame(&self) -> Option<ScreenFrame> {
        self.state.lock().unwrap().cached.clone()
    }
}

// ---------------------------------------------------------------------------
// Input side
// ---------------------------------------------------------------------------

struct InputState {
    attached: bool,
    keymap: Keymap,
    streaming: Option<StreamHandler>,
    listening: bool,
}

/// Per-context input endpoint over the shared dispatcher.
pub struct InputProxy {
    dispatcher: Arc<InputDispatcher>,
    state: Mutex<InputState>,
}

impl InputProxy {
    /// Create a detached proxy over `dispatcher`.
    ///
    /// New contexts start in listening keymap mode with no bindings, so a
    /// freshly activated context receives input as soon as it registers a
    /// keymap.
    #[must_use]
    pub fn new(dispatcher: Arc<InputDispatcher>) -> Self {
        Self {
            dispatcher,
            state: Mutex::new(InputState {
                attached: false,
                keymap: Keymap::new(),
                streaming: None,
                listening: true,
            }),
        }
    }
}

impl InputControl for InputProxy {
    fn set_keymap(&self, keymap: Keymap) -> Result<(), IoError> {
        let mut state = self.state.lock().unwrap();
        state.keymap = keymap;
        if state.attached {
            self.dispatcher.set_keymap(state.keymap.clone());
        }
        Ok(())
    }

    fn clear_keymap(&self) -> Result<(), IoError> {
        let mut state = self.state.lock().unwrap();
        state.keymap.clear();
        if state.attached {
            self.dispatcher.clear_keymap();
        }
        Ok(())
    }

    fn set_streaming(&self, handler: StreamHandler) -> Result<(), IoError> {
        let mut state = self.state.lock().unwrap();
        state.streaming = Some(handler.clone());
        if state.attached {
            self.dispatcher.set_streaming(handler);
        }
        Ok(())
    }

    fn remove_streaming(&self) -> Result<(), IoError> {
        let mut state = self.state.lock().unwrap();
        state.streaming = None;
        if state.attached {
            self.dispatcher.remove_streaming();
        }
        Ok(())
    }

    fn listen(&self) -> Result<(), IoError> {
        let mut state = self.state.lock().unwrap();
        state.listening = true;
        if state.attached {
            self.dispatcher.listen()?;
        }
        Ok(())
    }

    fn stop_listen(&self) -> Result<(), IoError> {
        let mut state = self.state.lock().unwrap();
        state.listening = false;
        if state.attached {
            self.dispatcher.stop_listen()?;
        }
        Ok(())
    }
}

impl InputPort for InputProxy {
    fn attach(&self) -> Result<(), IoError> {
        let mut state = self.state.lock().unwrap();
        self.dispatcher.set_keymap(state.keymap.clone());
        match &state.streaming {
            Some(handler) => self.dispatcher.set_streaming(handler.clone()),
            None => self.dispatcher.remove_streaming(),
        }
        if state.listening {
            self.dispatcher.listen()?;
        } else {
            self.dispatcher.stop_listen()?;
        }
        state.attached = true;
        debug!(listening = state.listening, "input port attached");
        Ok(())
    }

    fn detach(&self) {
        self.state.lock().unwrap().attached = false;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use candybar_core::{EventSink, InputDriver, InputEvent, KeyBinding, keys};

    use super::*;
    use crate::dispatch::DispatchConfig;

    /// Screen that records every call, optionally failing them all.
    struct RecordingScreen {
        frames: Mutex<Vec<ScreenFrame>>,
        clears: AtomicUsize,
        broken: AtomicBool,
    }

    impl RecordingScreen {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                clears: AtomicUsize::new(0),
                broken: AtomicBool::new(false),
            })
        }

        fn shown(&self) -> Vec<ScreenFrame> {
            self.frames.lock().unwrap().clone()
        }
    }

    impl OutputDevice for RecordingScreen {
        fn display_data(&self, lines: &[String]) -> Result<(), IoError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(IoError::device("screen offline"));
            }
            self.frames
                .lock()
                .unwrap()
                .push(ScreenFrame::Text(lines.to_vec()));
            Ok(())
        }

        fn display_image(&self, image: &MonoImage) -> Result<(), IoError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(IoError::device("screen offline"));
            }
            self.frames
                .lock()
                .unwrap()
                .push(ScreenFrame::Image(image.clone()));
            Ok(())
        }

        fn clear(&self) -> Result<(), IoError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(IoError::device("screen offline"));
            }
            self.clears.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct InertDriver;

    impl InputDriver for InertDriver {
        fn start(&self, _sink: Arc<dyn EventSink>) -> Result<(), IoError> {
            Ok(())
        }

        fn stop(&self) -> Result<(), IoError> {
            Ok(())
        }
    }

    #[test]
    fn detached_display_caches_without_touching_the_screen() {
        let screen = RecordingScreen::new();
        let proxy = OutputProxy::new(screen.clone());

        proxy.display_data(&["hello".into()]).unwrap();
        assert!(screen.shown().is_empty());
        assert_eq!(
            proxy.cached_frame(),
            Some(ScreenFrame::text(["hello"])),
        );
    }

    #[test]
    fn attach_replays_the_cached_frame() {
        let screen = RecordingScreen::new();
        let proxy = OutputProxy::new(screen.clone());

        proxy.display_data(&["cached".into()]).unwrap();
        proxy.attach().unwrap();

        assert_eq!(screen.shown(), vec![ScreenFrame::text(["cached"])]);

        // Attached now: display calls pass straight through.
        proxy.display_data(&["live".into()]).unwrap();
        assert_eq!(screen.shown().len(), 2);
    }

    #[test]
    fn attach_with_no_cached_frame_clears_the_screen() {
        let screen = RecordingScreen::new();
        let proxy = OutputProxy::new(screen.clone());

        proxy.attach().unwrap();
        assert_eq!(screen.clears.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_replay_leaves_the_port_detached() {
        let screen = RecordingScreen::new();
        let proxy = OutputProxy::new(screen.clone());
        proxy.display_data(&["frame".into()]).unwrap();

        screen.broken.store(true, Ordering::SeqCst);
        assert!(proxy.attach().is_err());

        // Still detached: display calls cache and succeed locally.
        screen.broken.store(false, Ordering::SeqCst);
        proxy.display_data(&["next".into()]).unwrap();
        assert!(screen.shown().is_empty());
    }

    #[test]
    fn clear_drops_the_cached_frame() {
        let screen = RecordingScreen::new();
        let proxy = OutputProxy::new(screen.clone());

        proxy.display_data(&["stale".into()]).unwrap();
        proxy.clear().unwrap();
        assert_eq!(proxy.cached_frame(), None);

        // Next attach blanks the display instead of flashing the old frame.
        proxy.attach().unwrap();
        assert!(screen.shown().is_empty());
        assert_eq!(screen.clears.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn input_attach_programs_the_recorded_keymap() {
        let dispatcher = InputDispatcher::new(
            Arc::new(InertDriver),
            DispatchConfig::default().with_poll_timeout(Duration::from_millis(5)),
        );
        let proxy = InputProxy::new(dispatcher.clone());

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let mut keymap = Keymap::new();
        keymap.insert(
            keys::KEY_ENTER.into(),
            KeyBinding::nullary(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        proxy.set_keymap(keymap).unwrap();

        // Detached: the dispatcher knows nothing about the binding yet.
        dispatcher.send_key(keys::KEY_ENTER, None);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        InputPort::attach(&proxy).unwrap();
        // The queued event plus a fresh one both land after attach.
        dispatcher.send_key(keys::KEY_ENTER, None);
        for _ in 0..100 {
            if hits.load(Ordering::SeqCst) >= 2 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        dispatcher.shutdown();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn detached_input_configuration_is_recorded_only() {
        let dispatcher = InputDispatcher::new(
            Arc::new(InertDriver),
            DispatchConfig::default().with_poll_timeout(Duration::from_millis(5)),
        );
        let proxy = InputProxy::new(dispatcher.clone());

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        proxy
            .set_streaming(Arc::new(move |_: &InputEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        proxy.stop_listen().unwrap();

        // Nothing attached, so the dispatcher was never started.
        assert!(!dispatcher.is_listening());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
