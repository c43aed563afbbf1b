//! Global hotkey listener over kernel input devices.
//!
//! Scans `/dev/input` for devices with keyboard capabilities and runs one
//! read loop per device, tracking pressed keys **per device**. The hotkey is
//! considered held when the union of all per-device sets covers the
//! configured combination. Keeping sets per device (rather than one flat
//! set) means a device that vanishes mid-hold takes its keys with it, so a
//! KVM switch can never leave the hotkey stuck down.
//!
//! A periodic scan (default 2 s) picks up new devices and reaps dead read
//! tasks. Starting with zero accessible keyboards is fine; the scanner just
//! waits for one to appear.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use evdev::{Device, EventStream, EventType, InputEventKind, Key};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::HotkeyCallbacks;
use crate::error::HotkeyError;

// ── Edge detection ─────────────────────────────────────────────────

/// A state change of the hotkey combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Edge {
    Activated,
    Deactivated,
}

/// Edge detector over the union of pressed keys. Repeats are suppressed:
/// an edge fires only when the "fully held" predicate actually flips.
pub(crate) struct HotkeyGate {
    codes: HashSet<Key>,
    active: bool,
}

impl HotkeyGate {
    pub(crate) fn new(codes: HashSet<Key>) -> Self {
        Self {
            codes,
            active: false,
        }
    }

    pub(crate) fn update(&mut self, held: &HashSet<Key>) -> Option<Edge> {
        let all_held = self.codes.is_subset(held);
        match (all_held, self.active) {
            (true, false) => {
                self.active = true;
                Some(Edge::Activated)
            }
            (false, true) => {
                self.active = false;
                Some(Edge::Deactivated)
            }
            _ => None,
        }
    }
}

// ── Device bookkeeping ─────────────────────────────────────────────

struct DeviceEntry {
    name: String,
    pressed: HashSet<Key>,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    devices: HashMap<PathBuf, DeviceEntry>,
    gate: HotkeyGate,
}

impl Shared {
    fn union(&self) -> HashSet<Key> {
        self.devices
            .values()
            .flat_map(|entry| entry.pressed.iter().copied())
            .collect()
    }

    fn apply_key(&mut self, path: &Path, key: Key, pressed: bool) -> Option<Edge> {
        let entry = self.devices.get_mut(path)?;
        if pressed {
            entry.pressed.insert(key);
        } else {
            entry.pressed.remove(&key);
        }
        let union = self.union();
        self.gate.update(&union)
    }

    /// Remove a device, dropping its pressed-key contribution. Returns the
    /// synthesized edge (if the hotkey was being held through this device)
    /// and the remaining device count.
    fn remove_device(&mut self, path: &Path) -> (Option<Edge>, usize) {
        let removed = self.devices.remove(path);
        if let Some(entry) = removed {
            tracing::info!(name = %entry.name, path = %path.display(), "Keyboard disconnected");
        }
        let union = self.union();
        let edge = self.gate.update(&union);
        (edge, self.devices.len())
    }
}

// ── Listener ───────────────────────────────────────────────────────

/// Global hotkey listener using evdev.
pub struct EvdevHotkeyListener {
    callbacks: HotkeyCallbacks,
    hotkey_names: Vec<String>,
    scan_interval: Duration,
    shared: Arc<Mutex<Shared>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for EvdevHotkeyListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvdevHotkeyListener")
            .field("hotkey_names", &self.hotkey_names)
            .field("scan_interval", &self.scan_interval)
            .finish_non_exhaustive()
    }
}

impl EvdevHotkeyListener {
    /// Resolve the configured key names and build the listener. An unknown
    /// key name is fatal: push-to-talk cannot run with a half-resolved
    /// combination.
    pub fn new(
        hotkey: &[String],
        scan_interval: Duration,
        callbacks: HotkeyCallbacks,
    ) -> Result<Self, HotkeyError> {
        let mut codes = HashSet::new();
        for name in hotkey {
            let code = Key::from_str(&format!("KEY_{name}"))
                .map_err(|_| HotkeyError::UnknownKey(name.clone()))?;
            codes.insert(code);
        }
        tracing::info!(hotkey = %hotkey.join("+"), ?codes, "PTT hotkey resolved");

        Ok(Self {
            callbacks,
            hotkey_names: hotkey.to_vec(),
            scan_interval,
            shared: Arc::new(Mutex::new(Shared {
                devices: HashMap::new(),
                gate: HotkeyGate::new(codes),
            })),
            cancel: CancellationToken::new(),
        })
    }

    /// Probe whether any input device is currently readable. Hot-plug means
    /// zero keyboards now is not a reason to fall back to terminal mode, but
    /// zero *accessible* devices is.
    #[must_use]
    pub fn input_devices_accessible() -> bool {
        evdev::enumerate().next().is_some()
    }

    /// Run the scan loop until [`stop`](Self::stop).
    pub async fn run(&mut self) -> Result<(), HotkeyError> {
        loop {
            self.scan_devices();
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.scan_interval) => {}
            }
        }

        if let Ok(mut shared) = self.shared.lock() {
            for (_, entry) in shared.devices.drain() {
                if let Some(task) = entry.task {
                    task.abort();
                }
            }
        }
        Ok(())
    }

    /// Stop the listener. Idempotent, safe from any task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// A stop handle usable after the listener moved into its task.
    #[must_use]
    pub fn stop_handle(&self) -> super::StopHandle {
        super::StopHandle::Token(self.cancel.clone())
    }

    /// The configured combination, e.g. `LEFTCTRL+LEFTMETA`.
    #[must_use]
    pub fn hotkey_label(&self) -> String {
        self.hotkey_names.join("+")
    }

    /// One scan pass: reap dead read tasks, then spawn read loops for newly
    /// visible keyboards (deduplicated by device name).
    fn scan_devices(&self) {
        let Ok(mut shared) = self.shared.lock() else {
            return;
        };
        let mut changed = false;

        // Reap read tasks that ended without running their disconnect path.
        let dead: Vec<PathBuf> = shared
            .devices
            .iter()
            .filter(|(_, entry)| entry.task.as_ref().is_some_and(JoinHandle::is_finished))
            .map(|(path, _)| path.clone())
            .collect();
        for path in dead {
            let (edge, _count) = shared.remove_device(&path);
            changed = true;
            if edge == Some(Edge::Deactivated) {
                (self.callbacks.on_deactivate)();
            }
        }

        let mut known_names: HashSet<String> = shared
            .devices
            .values()
            .map(|entry| entry.name.clone())
            .collect();

        for (path, device) in evdev::enumerate() {
            if shared.devices.contains_key(&path) || !is_keyboard(&device) {
                continue;
            }
            let name = device.name().unwrap_or("unknown").to_string();
            if known_names.contains(&name) {
                tracing::debug!(%name, path = %path.display(), "Duplicate keyboard name, skipping");
                continue;
            }

            match device.into_event_stream() {
                Ok(stream) => {
                    tracing::info!(%name, path = %path.display(), "Keyboard connected");
                    let task = tokio::spawn(read_device(
                        path.clone(),
                        stream,
                        Arc::clone(&self.shared),
                        self.callbacks.clone(),
                        self.cancel.clone(),
                    ));
                    known_names.insert(name.clone());
                    shared.devices.insert(
                        path,
                        DeviceEntry {
                            name,
                            pressed: HashSet::new(),
                            task: Some(task),
                        },
                    );
                    changed = true;
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Cannot open device");
                }
            }
        }

        let count = shared.devices.len();
        drop(shared);

        if changed {
            if let Some(cb) = &self.callbacks.on_device_count_changed {
                cb(count);
            }
        }
    }
}

/// Per-device read loop. Device disappearance (read error) is normal here:
/// clear the device's keys, synthesize a deactivate if the union no longer
/// satisfies the hotkey, then notify the device-count callback.
async fn read_device(
    path: PathBuf,
    mut stream: EventStream,
    shared: Arc<Mutex<Shared>>,
    callbacks: HotkeyCallbacks,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => return,
            event = stream.next_event() => match event {
                Ok(event) => event,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Device read failed");
                    break;
                }
            },
        };

        if event.event_type() != EventType::KEY {
            continue;
        }
        let InputEventKind::Key(key) = event.kind() else {
            continue;
        };

        // value: 0 = release, 1 = press, 2 = auto-repeat (ignored).
        let pressed = match event.value() {
            1 => true,
            0 => false,
            _ => continue,
        };

        let edge = shared
            .lock()
            .ok()
            .and_then(|mut s| s.apply_key(&path, key, pressed));
        match edge {
            Some(Edge::Activated) => (callbacks.on_activate)(),
            Some(Edge::Deactivated) => (callbacks.on_deactivate)(),
            None => {}
        }
    }

    // Disconnect path: deactivate first, then the count change.
    let removed = shared.lock().ok().map(|mut s| s.remove_device(&path));
    if let Some((edge, count)) = removed {
        if edge == Some(Edge::Deactivated) {
            (callbacks.on_deactivate)();
        }
        if let Some(cb) = &callbacks.on_device_count_changed {
            cb(count);
        }
    }
}

/// Keyboard detection: the device must expose typical keyboard keys.
fn is_keyboard(device: &Device) -> bool {
    device
        .supported_keys()
        .is_some_and(|keys| keys.contains(Key::KEY_A) && keys.contains(Key::KEY_ENTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(keys: &[Key]) -> HotkeyGate {
        HotkeyGate::new(keys.iter().copied().collect())
    }

    fn held(keys: &[Key]) -> HashSet<Key> {
        keys.iter().copied().collect()
    }

    #[test]
    fn fires_once_per_transition() {
        let mut g = gate(&[Key::KEY_LEFTCTRL, Key::KEY_LEFTMETA]);

        assert_eq!(g.update(&held(&[Key::KEY_LEFTCTRL])), None);
        assert_eq!(
            g.update(&held(&[Key::KEY_LEFTCTRL, Key::KEY_LEFTMETA])),
            Some(Edge::Activated)
        );
        // Still held: no repeat edge.
        assert_eq!(
            g.update(&held(&[Key::KEY_LEFTCTRL, Key::KEY_LEFTMETA])),
            None
        );
        assert_eq!(
            g.update(&held(&[Key::KEY_LEFTMETA])),
            Some(Edge::Deactivated)
        );
        assert_eq!(g.update(&held(&[])), None);
    }

    #[test]
    fn extra_keys_do_not_block_activation() {
        let mut g = gate(&[Key::KEY_LEFTCTRL]);
        assert_eq!(
            g.update(&held(&[Key::KEY_LEFTCTRL, Key::KEY_A])),
            Some(Edge::Activated)
        );
    }

    fn shared_with(gate_keys: &[Key]) -> Shared {
        Shared {
            devices: HashMap::new(),
            gate: HotkeyGate::new(gate_keys.iter().copied().collect()),
        }
    }

    fn add_device(shared: &mut Shared, path: &str, name: &str) {
        shared.devices.insert(
            PathBuf::from(path),
            DeviceEntry {
                name: name.to_string(),
                pressed: HashSet::new(),
                task: None,
            },
        );
    }

    #[test]
    fn disconnect_mid_hold_synthesizes_exactly_one_deactivate() {
        let mut shared = shared_with(&[Key::KEY_LEFTCTRL, Key::KEY_LEFTMETA]);
        add_device(&mut shared, "/dev/input/event1", "kbd-a");
        add_device(&mut shared, "/dev/input/event2", "kbd-b");

        let p1 = PathBuf::from("/dev/input/event1");
        let p2 = PathBuf::from("/dev/input/event2");

        assert_eq!(shared.apply_key(&p1, Key::KEY_LEFTCTRL, true), None);
        assert_eq!(
            shared.apply_key(&p2, Key::KEY_LEFTMETA, true),
            Some(Edge::Activated)
        );

        // The device holding half the combination vanishes.
        let (edge, count) = shared.remove_device(&p2);
        assert_eq!(edge, Some(Edge::Deactivated));
        assert_eq!(count, 1);

        // Its keys are gone from the union for good.
        assert!(!shared.union().contains(&Key::KEY_LEFTMETA));

        // And nothing fires twice.
        let (edge, count) = shared.remove_device(&p1);
        assert_eq!(edge, None);
        assert_eq!(count, 0);
    }

    #[test]
    fn release_on_one_device_does_not_disturb_others() {
        let mut shared = shared_with(&[Key::KEY_LEFTCTRL]);
        add_device(&mut shared, "/dev/input/event1", "kbd-a");
        add_device(&mut shared, "/dev/input/event2", "kbd-b");

        let p1 = PathBuf::from("/dev/input/event1");
        let p2 = PathBuf::from("/dev/input/event2");

        // Both devices hold the key; releasing on one keeps the union intact.
        assert_eq!(
            shared.apply_key(&p1, Key::KEY_LEFTCTRL, true),
            Some(Edge::Activated)
        );
        assert_eq!(shared.apply_key(&p2, Key::KEY_LEFTCTRL, true), None);
        assert_eq!(shared.apply_key(&p1, Key::KEY_LEFTCTRL, false), None);
        assert_eq!(
            shared.apply_key(&p2, Key::KEY_LEFTCTRL, false),
            Some(Edge::Deactivated)
        );
    }

    #[test]
    fn stop_is_idempotent() {
        let callbacks = HotkeyCallbacks {
            on_activate: Arc::new(|| {}),
            on_deactivate: Arc::new(|| {}),
            on_device_count_changed: None,
        };
        let listener = EvdevHotkeyListener::new(
            &["LEFTCTRL".to_string()],
            Duration::from_secs(2),
            callbacks,
        )
        .unwrap();
        listener.stop();
        listener.stop();
        listener.stop_handle().stop();
    }

    #[test]
    fn unknown_key_name_is_fatal() {
        let callbacks = HotkeyCallbacks {
            on_activate: Arc::new(|| {}),
            on_deactivate: Arc::new(|| {}),
            on_device_count_changed: None,
        };
        let err = EvdevHotkeyListener::new(
            &["NOT_A_KEY".to_string()],
            Duration::from_secs(2),
            callbacks,
        )
        .unwrap_err();
        assert!(matches!(err, HotkeyError::UnknownKey(name) if name == "NOT_A_KEY"));
    }
}
