//! System tray indicator for daemon mode.
//!
//! A colored dot reporting the daemon's state: gray while disconnected,
//! green when ready, red while recording ("on air"), yellow when the server
//! is reachable but no keyboard is visible (KVM switched away). The ksni
//! service runs on its own OS thread; state updates go through its handle
//! and are safe from any thread.

use std::sync::{Arc, Mutex};

use crate::hotkey::Callback;

/// Icon edge length in pixels.
const ICON_SIZE: i32 = 22;

/// Tray indicator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrayState {
    /// Starting up / no server connection.
    #[default]
    Disconnected,
    /// Connected, waiting for the hotkey.
    Ready,
    /// Currently recording.
    Recording,
    /// Connected but no input devices visible.
    Degraded,
}

impl TrayState {
    /// Icon fill color (RGB).
    const fn color(self) -> (u8, u8, u8) {
        match self {
            Self::Disconnected => (0x66, 0x66, 0x66),
            Self::Ready => (0x22, 0xc5, 0x5e),
            Self::Recording => (0xef, 0x44, 0x44),
            Self::Degraded => (0xea, 0xb3, 0x08),
        }
    }
}

struct PttTray {
    state: TrayState,
    on_quit: Callback,
}

impl ksni::Tray for PttTray {
    fn id(&self) -> String {
        "stt-ptt".to_string()
    }

    fn title(&self) -> String {
        "STT Push-to-Talk".to_string()
    }

    fn icon_pixmap(&self) -> Vec<ksni::Icon> {
        vec![circle_icon(self.state)]
    }

    fn menu(&self) -> Vec<ksni::MenuItem<Self>> {
        vec![ksni::menu::StandardItem {
            label: "Quit".to_string(),
            activate: Box::new(|tray: &mut Self| {
                tracing::info!("Quit requested from tray menu");
                (tray.on_quit)();
            }),
            ..Default::default()
        }
        .into()]
    }
}

/// Handle to the tray service thread.
pub struct TrayIndicator {
    handle: ksni::Handle<PttTray>,
    state: Arc<Mutex<TrayState>>,
}

impl TrayIndicator {
    /// Start the tray on its own thread. `on_quit` fires from the tray
    /// thread when the user picks Quit.
    #[must_use]
    pub fn spawn(on_quit: Callback) -> Self {
        let service = ksni::TrayService::new(PttTray {
            state: TrayState::default(),
            on_quit,
        });
        let handle = service.handle();
        service.spawn();
        tracing::debug!("Tray indicator started");

        Self {
            handle,
            state: Arc::new(Mutex::new(TrayState::default())),
        }
    }

    /// Update the indicator. Safe from any thread.
    pub fn set_state(&self, state: TrayState) {
        if let Ok(mut current) = self.state.lock() {
            if *current == state {
                return;
            }
            *current = state;
        }
        self.handle.update(move |tray| tray.state = state);
    }

    /// The last state set on this indicator.
    #[must_use]
    pub fn state(&self) -> TrayState {
        self.state.lock().map(|s| *s).unwrap_or_default()
    }

    /// Stop the tray service thread.
    pub fn stop(&self) {
        self.handle.shutdown();
        tracing::debug!("Tray indicator stopped");
    }
}

/// Render a solid circle on a transparent square (ARGB32, network order).
fn circle_icon(state: TrayState) -> ksni::Icon {
    let (r, g, b) = state.color();
    let center = f64::from(ICON_SIZE - 1) / 2.0;
    let radius = f64::from(ICON_SIZE) / 2.0 - 2.0;

    let mut data = Vec::with_capacity((ICON_SIZE * ICON_SIZE * 4) as usize);
    for y in 0..ICON_SIZE {
        for x in 0..ICON_SIZE {
            let dx = f64::from(x) - center;
            let dy = f64::from(y) - center;
            let inside = (dx * dx + dy * dy).sqrt() <= radius;
            if inside {
                data.extend_from_slice(&[0xff, r, g, b]);
            } else {
                data.extend_from_slice(&[0, 0, 0, 0]);
            }
        }
    }

    ksni::Icon {
        width: ICON_SIZE,
        height: ICON_SIZE,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icon_has_the_right_geometry() {
        let icon = circle_icon(TrayState::Ready);
        assert_eq!(icon.width, ICON_SIZE);
        assert_eq!(icon.height, ICON_SIZE);
        assert_eq!(icon.data.len(), (ICON_SIZE * ICON_SIZE * 4) as usize);
    }

    #[test]
    fn icon_center_is_opaque_and_corners_transparent() {
        let icon = circle_icon(TrayState::Recording);
        let center_px = ((ICON_SIZE / 2) * ICON_SIZE + ICON_SIZE / 2) as usize * 4;
        assert_eq!(icon.data[center_px], 0xff);
        assert_eq!(
            &icon.data[center_px + 1..center_px + 4],
            &[0xef, 0x44, 0x44]
        );
        assert_eq!(&icon.data[0..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn each_state_has_a_distinct_color() {
        let states = [
            TrayState::Disconnected,
            TrayState::Ready,
            TrayState::Recording,
            TrayState::Degraded,
        ];
        for (i, a) in states.iter().enumerate() {
            for b in &states[i + 1..] {
                assert_ne!(a.color(), b.color());
            }
        }
    }
}
