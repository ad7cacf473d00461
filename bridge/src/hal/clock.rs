/// Core clock profile and frequency-scale selection.
///
/// The board supplies low/mid/high frequencies when it knows them. Otherwise
/// the default ladder is probed through the platform: each candidate rate is
/// tried in turn and the first the clock tree accepts wins. The mid scale is
/// the boot rate.
use super::platform::Platform;
use super::InitError;

pub const FREQ_110: u32 = 110_000_000;
pub const FREQ_275: u32 = 275_000_000;
pub const FREQ_550: u32 = 550_000_000;
pub const FREQ_600: u32 = 600_000_000;
pub const FREQ_733: u32 = 733_000_000;
pub const FREQ_800: u32 = 800_000_000;

/// Known rates with their utilisation window (instructions per sample).
const SCALE_TABLE: [(u32, u32, u32); 6] = [
    (FREQ_110, 0x0000, 0x3000),
    (FREQ_275, 0x2000, 0x7000),
    (FREQ_550, 0x6000, 0xF000),
    (FREQ_600, 0x6000, 0xF000),
    (FREQ_733, 0xE000, 0x1_8000),
    (FREQ_800, 0xE000, 0x1_8000),
];

/// Board-provided clock profile. Zero means "probe the default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockProfile {
    pub low: u32,
    pub mid: u32,
    pub high: u32,
    /// Turbo parts run the 600/800 ladder.
    pub turbo: bool,
}

/// One selected frequency scale and its utilisation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleWindow {
    pub frequency: u32,
    pub minimum: u32,
    pub maximum: u32,
}

/// Low, mid and high scales, in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyScales {
    pub scales: [ScaleWindow; 3],
}

impl FrequencyScales {
    pub fn low(&self) -> ScaleWindow {
        self.scales[0]
    }

    pub fn mid(&self) -> ScaleWindow {
        self.scales[1]
    }

    pub fn high(&self) -> ScaleWindow {
        self.scales[2]
    }
}

fn window_for(frequency: u32) -> Option<ScaleWindow> {
    SCALE_TABLE
        .iter()
        .find(|(f, _, _)| *f == frequency)
        .map(|&(frequency, minimum, maximum)| ScaleWindow { frequency, minimum, maximum })
}

/// Try each candidate rate; return the first one the clock accepts.
fn first_accepted(platform: &dyn Platform, id: u8, candidates: &[u32]) -> Option<u32> {
    candidates
        .iter()
        .copied()
        .find(|&hz| platform.set_core_clock_rate(id, hz).is_ok())
}

/// Resolve the three scales, program the mid rate and enable the core clock.
pub fn apply_profile(
    platform: &dyn Platform,
    id: u8,
    profile: &ClockProfile,
) -> Result<FrequencyScales, InitError> {
    let (low, mid, high) = if profile.low != 0 && profile.mid != 0 && profile.high != 0 {
        (profile.low, profile.mid, profile.high)
    } else {
        let low = first_accepted(platform, id, &[FREQ_110]).ok_or(InitError::ClockUnavailable)?;
        let (mid_ladder, high_ladder): (&[u32], &[u32]) = if profile.turbo {
            (&[FREQ_600, FREQ_550], &[FREQ_800, FREQ_733])
        } else {
            (&[FREQ_275], &[FREQ_550])
        };
        let mid = first_accepted(platform, id, mid_ladder).ok_or(InitError::ClockUnavailable)?;
        let high = first_accepted(platform, id, high_ladder).ok_or(InitError::ClockUnavailable)?;
        (low, mid, high)
    };

    let mut scales = [ScaleWindow { frequency: 0, minimum: 0, maximum: 0 }; 3];
    for (slot, hz) in scales.iter_mut().zip([low, mid, high]) {
        *slot = match window_for(hz) {
            Some(w) => w,
            None => {
                log::warn!("core{}: no scale table entry for {} Hz", id, hz);
                return Err(InitError::ClockUnavailable);
            }
        };
    }

    log::info!(
        "core{}: frequency scales {}/{}/{} MHz",
        id,
        low / 1_000_000,
        mid / 1_000_000,
        high / 1_000_000
    );

    platform
        .set_core_clock_rate(id, mid)
        .map_err(|_| InitError::ClockUnavailable)?;
    platform
        .enable_core_clock(id)
        .map_err(|_| InitError::ClockUnavailable)?;

    Ok(FrequencyScales { scales })
}
