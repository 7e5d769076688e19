//! Battery and lid gating for the display.
//!
//! The decision itself is a pure function of the settings and a
//! [`PowerContext`] snapshot. The host owns the lid state and injects it;
//! AC status comes from a [`PowerSource`].

use crate::config::Settings;
use std::fs;
use std::path::{Path, PathBuf};

/// Power state at the moment of one policy evaluation. Never persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PowerContext {
    pub on_battery: bool,
    pub lid_closed: bool,
}

/// Whether the display should be lit.
///
/// Off when brightness is 0, when battery saving is on and we are not on
/// AC, or when lid awareness is on and the lid is closed.
pub fn display_active(
    brightness: u8,
    auto_battery_saver: bool,
    lid_aware: bool,
    ctx: PowerContext,
) -> bool {
    !(brightness == 0 || (auto_battery_saver && ctx.on_battery) || (lid_aware && ctx.lid_closed))
}

/// [`display_active`] for a settings snapshot.
pub fn settings_allow_display(settings: &Settings, ctx: PowerContext) -> bool {
    display_active(
        settings.brightness,
        settings.auto_battery_saver,
        settings.lid_aware,
        ctx,
    )
}

/// One-shot wake request.
///
/// Armed by lid and resume events; consumed the first time the policy
/// says the display is active, so re-evaluations do not keep pulsing the
/// device awake.
#[derive(Debug, Default)]
pub struct WakeLatch {
    pending: bool,
}

impl WakeLatch {
    pub fn arm(&mut self) {
        self.pending = true;
    }

    pub fn is_armed(&self) -> bool {
        self.pending
    }

    /// True (once) when armed and the display is about to be active.
    pub fn take_if_active(&mut self, active: bool) -> bool {
        if active && self.pending {
            self.pending = false;
            true
        } else {
            false
        }
    }
}

// ── AC status ──────────────────────────────────────────────────────

pub trait PowerSource: Send + Sync {
    fn on_battery(&self) -> bool;
}

/// Fixed answer; used by `--simulate` and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticPower {
    pub on_battery: bool,
}

impl PowerSource for StaticPower {
    fn on_battery(&self) -> bool {
        self.on_battery
    }
}

/// Reads the kernel's power supply class.
///
/// Any `Mains` supply reporting `online == 1` means AC. A machine that
/// lists no mains supply at all (a desktop, a container) counts as AC too.
#[derive(Clone, Debug)]
pub struct SysfsPowerSource {
    root: PathBuf,
}

impl SysfsPowerSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsPowerSource {
    fn default() -> Self {
        Self::new("/sys/class/power_supply")
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

impl PowerSource for SysfsPowerSource {
    fn on_battery(&self) -> bool {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return false;
        };

        let mut saw_mains = false;
        for entry in entries.flatten() {
            let dir = entry.path();
            if read_trimmed(&dir.join("type")).as_deref() != Some("Mains") {
                continue;
            }
            saw_mains = true;
            if read_trimmed(&dir.join("online")).as_deref() == Some("1") {
                return false;
            }
        }

        saw_mains
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::TempDir;

    fn ctx(on_battery: bool, lid_closed: bool) -> PowerContext {
        PowerContext {
            on_battery,
            lid_closed,
        }
    }

    #[rstest]
    #[case(0, false, false, ctx(false, false), false)]
    #[case(0, true, true, ctx(true, true), false)]
    #[case(2, true, false, ctx(true, false), false)]
    #[case(2, true, false, ctx(false, false), true)]
    #[case(2, false, false, ctx(true, false), true)]
    #[case(2, false, true, ctx(false, true), false)]
    #[case(2, false, false, ctx(false, true), true)]
    #[case(1, true, true, ctx(false, false), true)]
    fn policy_table(
        #[case] brightness: u8,
        #[case] auto: bool,
        #[case] lid: bool,
        #[case] power: PowerContext,
        #[case] expected: bool,
    ) {
        assert_eq!(display_active(brightness, auto, lid, power), expected);
    }

    #[test]
    fn zero_brightness_is_always_inactive() {
        for on_battery in [false, true] {
            for lid_closed in [false, true] {
                for auto in [false, true] {
                    for lid in [false, true] {
                        assert!(!display_active(0, auto, lid, ctx(on_battery, lid_closed)));
                    }
                }
            }
        }
    }

    #[test]
    fn wake_latch_fires_once_and_only_when_active() {
        let mut latch = WakeLatch::default();
        assert!(!latch.take_if_active(true));

        latch.arm();
        assert!(!latch.take_if_active(false));
        assert!(latch.is_armed());
        assert!(latch.take_if_active(true));
        assert!(!latch.take_if_active(true));
    }

    fn supply(root: &Path, name: &str, kind: &str, online: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("type"), format!("{kind}\n")).unwrap();
        fs::write(dir.join("online"), format!("{online}\n")).unwrap();
    }

    #[test]
    fn sysfs_mains_online_is_ac() {
        let tmp = TempDir::new().unwrap();
        supply(tmp.path(), "BAT0", "Battery", "0");
        supply(tmp.path(), "AC0", "Mains", "1");
        assert!(!SysfsPowerSource::new(tmp.path()).on_battery());
    }

    #[test]
    fn sysfs_mains_offline_is_battery() {
        let tmp = TempDir::new().unwrap();
        supply(tmp.path(), "BAT0", "Battery", "1");
        supply(tmp.path(), "ADP1", "Mains", "0");
        assert!(SysfsPowerSource::new(tmp.path()).on_battery());
    }

    #[test]
    fn sysfs_without_mains_counts_as_ac() {
        let tmp = TempDir::new().unwrap();
        supply(tmp.path(), "BAT0", "Battery", "1");
        assert!(!SysfsPowerSource::new(tmp.path()).on_battery());
        assert!(!SysfsPowerSource::new(tmp.path().join("missing")).on_battery());
    }
}
