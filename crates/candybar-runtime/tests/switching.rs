//! End-to-end switching scenarios: back-stack bookkeeping, finished
//! returns, rollback, and the failsafe landing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use candybar_core::{
    EventSink, InputControl, InputDriver, InputPort, IoError, Keymap, MonoImage, OutputDevice,
    OutputPort, ScreenFrame, StreamHandler,
};
use candybar_runtime::{
    ContextError, ContextManager, DispatchConfig, InputDispatcher, Latch, ManagerConfig,
    TargetOutcome,
};

struct NullScreen;

impl OutputDevice for NullScreen {
    fn display_data(&self, _lines: &[String]) -> Result<(), IoError> {
        Ok(())
    }

    fn display_image(&self, _image: &MonoImage) -> Result<(), IoError> {
        Ok(())
    }

    fn clear(&self) -> Result<(), IoError> {
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

/// Output port whose attach can be broken at will.
struct FlakyOutput {
    broken: Arc<AtomicBool>,
}

impl OutputDevice for FlakyOutput {
    fn display_data(&self, _lines: &[String]) -> Result<(), IoError> {
        Ok(())
    }

    fn display_image(&self, _image: &MonoImage) -> Result<(), IoError> {
        Ok(())
    }

    fn clear(&self) -> Result<(), IoError> {
        Ok(())
    }
}

impl OutputPort for FlakyOutput {
    fn attach(&self) -> Result<(), IoError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(IoError::device("output port broken"));
        }
        Ok(())
    }

    fn detach(&self) {}

    fn cached_frame(&self) -> Option<ScreenFrame> {
        None
    }
}

/// Input port whose attach can be broken at will.
struct FlakyInput {
    broken: Arc<AtomicBool>,
}

impl InputControl for FlakyInput {
    fn set_keymap(&self, _keymap: Keymap) -> Result<(), IoError> {
        Ok(())
    }

    fn clear_keymap(&self) -> Result<(), IoError> {
        Ok(())
    }

    fn set_streaming(&self, _handler: StreamHandler) -> Result<(), IoError> {
        Ok(())
    }

    fn remove_streaming(&self) -> Result<(), IoError> {
        Ok(())
    }

    fn listen(&self) -> Result<(), IoError> {
        Ok(())
    }

    fn stop_listen(&self) -> Result<(), IoError> {
        Ok(())
    }
}

impl InputPort for FlakyInput {
    fn attach(&self) -> Result<(), IoError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(IoError::device("input port broken"));
        }
        Ok(())
    }

    fn detach(&self) {}
}

fn runtime(fallback: &str) -> Arc<ContextManager> {
    let dispatcher = InputDispatcher::new(
        Arc::new(InertDriver),
        DispatchConfig::default().with_poll_timeout(Duration::from_millis(5)),
    );
    ContextManager::new(Arc::new(NullScreen), dispatcher, ManagerConfig::new(fallback))
}

/// A typical application target: block on the stop latch, then finish.
fn waiting_target(stop: &Latch) -> TargetOutcome {
    stop.wait_timeout(Duration::from_secs(30));
    TargetOutcome::Finished
}

fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached within 2s");
}

#[test]
fn back_stack_tracks_switch_history() {
    let manager = runtime("main");
    manager.create_context("main", false).unwrap();
    let t1 = manager.create_context("t1", true).unwrap();
    let t2 = manager.create_context("t2", true).unwrap();
    t1.set_target(waiting_target).unwrap();
    t2.set_target(waiting_target).unwrap();

    manager.switch_to_context("main", true).unwrap();
    manager.switch_to_context("t1", true).unwrap();
    assert_eq!(manager.current_context().as_deref(), Some("t1"));

    manager.switch_to_context("t2", true).unwrap();
    assert_eq!(manager.current_context().as_deref(), Some("t2"));

    manager.switch_to_context("t1", true).unwrap();
    assert_eq!(manager.current_context().as_deref(), Some("t1"));
    assert_eq!(manager.previous_context("t1").as_deref(), Some("t2"));
    assert_eq!(manager.previous_context("t2").as_deref(), Some("t1"));
    assert_eq!(manager.previous_context("main"), None);

    manager.shutdown();
}

#[test]
fn finished_target_returns_to_previous_context() {
    let manager = runtime("main");
    manager.create_context("main", false).unwrap();
    let app = manager.create_context("app", true).unwrap();

    let done = Latch::new();
    let trigger = done.clone();
    app.set_target(move |stop| {
        while !done.is_set() && !stop.is_set() {
            done.wait_timeout(Duration::from_millis(10));
        }
        TargetOutcome::Finished
    })
    .unwrap();

    // Give the app something on screen so the finish has a frame to drop.
    app.output()
        .unwrap()
        .display_data(&["app screen".into()])
        .unwrap();

    manager.switch_to_context("main", true).unwrap();
    manager.switch_to_context("app", true).unwrap();
    assert_eq!(manager.current_context().as_deref(), Some("app"));
    assert!(app.is_active().unwrap());

    trigger.set();
    wait_until(|| manager.current_context().as_deref() == Some("main"));

    // The stale frame was cleared so it cannot flash on reactivation.
    assert_eq!(app.get_context_image("app").unwrap(), None);
    manager.shutdown();
}

#[test]
fn switching_to_threaded_context_without_target_rolls_back() {
    let manager = runtime("main");
    manager.create_context("main", false).unwrap();
    manager.create_context("broken", true).unwrap();

    manager.switch_to_context("main", true).unwrap();

    let err = manager.switch_to_context("broken", true).unwrap_err();
    assert!(matches!(err, ContextError::Configuration(_)));
    assert_eq!(manager.current_context().as_deref(), Some("main"));
    // The tentative back-reference was popped back out.
    assert_eq!(manager.previous_context("broken"), None);

    // Same failure with do_raise unset is swallowed.
    manager.switch_to_context("broken", false).unwrap();
    assert_eq!(manager.current_context().as_deref(), Some("main"));
}

#[test]
fn broken_destination_restores_the_previous_context() {
    let manager = runtime("main");
    manager.create_context("main", false).unwrap();

    let broken = Arc::new(AtomicBool::new(true));
    manager
        .create_context_with_ports(
            "t1",
            false,
            Arc::new(FlakyInput {
                broken: broken.clone(),
            }),
            Arc::new(FlakyOutput {
                broken: broken.clone(),
            }),
        )
        .unwrap();

    manager.switch_to_context("main", true).unwrap();

    let err = manager.switch_to_context("t1", true).unwrap_err();
    assert!(matches!(err, ContextError::Io(_)));
    assert_eq!(manager.current_context().as_deref(), Some("main"));
}

#[test]
fn double_broken_switch_lands_on_fallback() {
    let manager = runtime("main");
    manager.create_context("main", false).unwrap();

    let t1_broken = Arc::new(AtomicBool::new(false));
    let t2_broken = Arc::new(AtomicBool::new(false));
    manager
        .create_context_with_ports(
            "t1",
            false,
            Arc::new(FlakyInput {
                broken: t1_broken.clone(),
            }),
            Arc::new(FlakyOutput {
                broken: t1_broken.clone(),
            }),
        )
        .unwrap();
    manager
        .create_context_with_ports(
            "t2",
            false,
            Arc::new(FlakyInput {
                broken: t2_broken.clone(),
            }),
            Arc::new(FlakyOutput {
                broken: t2_broken.clone(),
            }),
        )
        .unwrap();

    manager.switch_to_context("main", true).unwrap();
    manager.switch_to_context("t1", true).unwrap();
    assert_eq!(manager.current_context().as_deref(), Some("t1"));

    // Both the destination and the rollback path are now broken: the only
    // valid landing is the fallback, and with do_raise unset the caller
    // sees no error at all.
    t1_broken.store(true, Ordering::SeqCst);
    t2_broken.store(true, Ordering::SeqCst);
    manager.switch_to_context("t2", false).unwrap();
    assert_eq!(manager.current_context().as_deref(), Some("main"));
    // The failsafe does not record a back-reference for the failed hop.
    assert_eq!(manager.previous_context("t2"), None);
}

#[test]
fn duplicate_context_names_are_rejected() {
    let manager = runtime("main");
    manager.create_context("main", false).unwrap();
    let err = manager.create_context("main", true).unwrap_err();
    assert!(matches!(err, ContextError::DuplicateContext(name) if name == "main"));
}

#[test]
fn switching_to_an_unknown_context_errors() {
    let manager = runtime("main");
    manager.create_context("main", false).unwrap();
    let err = manager.switch_to_context("ghost", true).unwrap_err();
    assert!(matches!(err, ContextError::UnknownContext(name) if name == "ghost"));
}

#[test]
fn switching_without_a_valid_fallback_is_refused() {
    let manager = runtime("main");
    // "main" was never created; no switch may proceed.
    manager.create_context("app", false).unwrap();
    let err = manager.switch_to_context("app", true).unwrap_err();
    assert!(matches!(err, ContextError::FallbackMissing(name) if name == "main"));
    assert_eq!(manager.current_context(), None);
}

#[test]
fn a_misconfigured_fallback_also_refuses_switches() {
    let manager = runtime("main");
    // Threaded with no target: not provably reachable.
    manager.create_context("main", true).unwrap();
    manager.create_context("app", false).unwrap();
    let err = manager.switch_to_context("app", true).unwrap_err();
    assert!(matches!(err, ContextError::FallbackMissing(_)));
}

#[test]
fn shutdown_joins_workers_and_refuses_new_requests() {
    let manager = runtime("main");
    manager.create_context("main", false).unwrap();
    let app = manager.create_context("app", true).unwrap();
    app.set_target(waiting_target).unwrap();

    manager.switch_to_context("main", true).unwrap();
    manager.switch_to_context("app", true).unwrap();

    // Joins the 30s-wait target promptly via its stop latch.
    manager.shutdown();

    let err = manager.switch_to_context("main", true).unwrap_err();
    assert!(matches!(err, ContextError::ShuttingDown));
    let err = app.request_switch().unwrap_err();
    assert!(matches!(err, ContextError::ShuttingDown));
}

#[test]
fn panicking_target_still_returns_to_previous_context() {
    let manager = runtime("main");
    manager.create_context("main", false).unwrap();
    let app = manager.create_context("app", true).unwrap();
    app.set_target(|_stop: &Latch| -> TargetOutcome {
        panic!("application crashed");
    })
    .unwrap();

    manager.switch_to_context("main", true).unwrap();
    manager.switch_to_context("app", true).unwrap();

    // The completion block fires before the panic resumes, so the crash
    // reads as a finish and the screen goes back to main.
    wait_until(|| manager.current_context().as_deref() == Some("main"));
    manager.shutdown();
}
