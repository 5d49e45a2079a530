#![forbid(unsafe_code)]

//! Candybar reference application.
//!
//! Wires a scripted keypad and a console screen through the full
//! manager/dispatcher stack: a non-threaded fallback menu, a threaded
//! clock app, a threaded lock screen holding the exclusive lock, and a
//! global hang-up key. The keypad script walks the whole scenario —
//! switch, finished-return, exclusive mode — then the process shuts the
//! runtime down.
//!
//! # Running
//!
//! ```sh
//! RUST_LOG=debug cargo run -p candybar-harness
//! ```

mod device;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use candybar::OutputDevice;
use candybar::prelude::*;
use tracing::warn;

use crate::device::{ConsoleScreen, ScriptedKeypad};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // One press every 700ms: open the clock, leave it, raise the lock
    // screen, try (and fail) to leave it, unlock, and go home.
    let keypad = Arc::new(ScriptedKeypad::new([
        (700, keys::KEY_ENTER),  // main -> clock
        (700, keys::KEY_LEFT),   // clock finishes, back to main
        (700, keys::KEY_STAR),   // main -> lock screen (exclusive)
        (700, keys::KEY_ENTER),  // denied: lock screen holds the lock
        (700, keys::KEY_POUND),  // unlock, lock screen finishes
        (700, keys::KEY_HANGUP), // global: home (already there)
    ]));
    let screen = Arc::new(ConsoleScreen);
    let dispatcher = InputDispatcher::new(keypad.clone(), DispatchConfig::default());
    let manager = ContextManager::new(
        screen,
        dispatcher,
        ManagerConfig::new("main").with_exclusive_allowlist(["lock_screen"]),
    );

    let menu = manager.create_context("main", false)?;
    menu.set_menu_name("Main menu")?;
    let clock = manager.create_context("clock", true)?;
    clock.set_menu_name("Clock")?;
    let lock_screen = manager.create_context("lock_screen", true)?;
    lock_screen.set_menu_name("Lock screen")?;

    setup_menu(&menu)?;
    setup_clock(&clock);
    setup_lock_screen(&lock_screen);

    // The hang-up key works everywhere, ahead of all context keymaps.
    let home = menu.clone();
    let mut globals = HashMap::new();
    globals.insert(
        keys::KEY_HANGUP.to_string(),
        KeyBinding::nullary(move || {
            if let Err(err) = home.request_switch() {
                warn!(error = %err, "hang-up switch failed");
            }
        }),
    );
    for (key, result) in menu.request_global_keymap(globals)? {
        if let Err(err) = result {
            warn!(key = %key, error = %err, "global bind failed");
        }
    }

    clock.register_action(ActionSpec::new(
        "open",
        ActionKind::ContextSwitch,
        "Open clock",
        || {},
    ))?;

    manager.switch_to_context("main", true)?;

    // Let the script play out, then tear down.
    thread::sleep(Duration::from_secs(6));
    keypad.halt();
    manager.shutdown();
    Ok(())
}

/// The fallback menu is non-threaded: the harness itself draws it and
/// binds its keys once, and the ports replay both on every reattach.
fn setup_menu(menu: &ContextHandle) -> Result<()> {
    menu.output()?.display_data(&[
        "Main menu".into(),
        "[ENTER] Clock".into(),
        "[*] Lock".into(),
    ])?;

    let mut keymap = Keymap::new();
    let to_clock = menu.clone();
    keymap.insert(
        keys::KEY_ENTER.to_string(),
        KeyBinding::nullary(move || {
            let _ = to_clock.request_switch_to("clock");
        }),
    );
    let to_lock = menu.clone();
    keymap.insert(
        keys::KEY_STAR.to_string(),
        KeyBinding::nullary(move || {
            let _ = to_lock.request_switch_to("lock_screen");
        }),
    );
    menu.input()?.set_keymap(keymap)?;
    Ok(())
}

/// Threaded app: draws elapsed time until LEFT sends it back.
fn setup_clock(clock: &ContextHandle) {
    let handle = clock.clone();
    let result = clock.set_target(move |stop| {
        let back = Latch::new();
        let leave = back.clone();
        let mut keymap = Keymap::new();
        keymap.insert(
            keys::KEY_LEFT.to_string(),
            KeyBinding::nullary(move || leave.set()),
        );
        let (Ok(input), Ok(output)) = (handle.input(), handle.output()) else {
            return TargetOutcome::Finished;
        };
        let _ = input.set_keymap(keymap);

        let started = Instant::now();
        loop {
            let _ = output.display_data(&[
                "Clock".into(),
                format!("up {:>3}s", started.elapsed().as_secs()),
                "[<] back".into(),
            ]);
            if back.wait_timeout(Duration::from_secs(1)) || stop.is_set() {
                return TargetOutcome::Finished;
            }
        }
    });
    if let Err(err) = result {
        warn!(error = %err, "clock target not bound");
    }
}

/// Threaded lock screen: takes the exclusive lock on entry, ignores
/// everything until POUND, then rescinds and finishes.
fn setup_lock_screen(lock_screen: &ContextHandle) {
    let handle = lock_screen.clone();
    let result = lock_screen.set_target(move |stop| {
        let unlocked = Latch::new();
        let unlock = unlocked.clone();
        let mut keymap = Keymap::new();
        keymap.insert(
            keys::KEY_POUND.to_string(),
            KeyBinding::nullary(move || unlock.set()),
        );
        let Ok(input) = handle.input() else {
            return TargetOutcome::Finished;
        };
        let _ = input.set_keymap(keymap);
        if let Ok(output) = handle.output() {
            let _ = output.display_data(&["Locked".into(), "[#] unlock".into()]);
        }

        match handle.request_exclusive() {
            Ok(true) => {}
            Ok(false) => warn!("exclusive lock denied"),
            Err(err) => warn!(error = %err, "exclusive request failed"),
        }

        while !unlocked.wait_timeout(Duration::from_millis(100)) && !stop.is_set() {}

        if let Err(err) = handle.rescind_exclusive() {
            warn!(error = %err, "rescind failed");
        }
        TargetOutcome::Finished
    });
    if let Err(err) = result {
        warn!(error = %err, "lock screen target not bound");
    }
}
