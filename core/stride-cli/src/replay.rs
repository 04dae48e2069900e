//! Feeds a recorded track through the live engine.
//!
//! Tracks are NDJSON, one fix per line in the provider's shape:
//! `{"latitude":..,"longitude":..,"accuracyMeters":..,"speedMps":..,"timestamp":".."}`.
//! The replay clock jumps to each fix's timestamp before the fix is pushed,
//! so elapsed time matches the track rather than the wall clock.

use std::path::Path;

use stride_core::{ManualClock, ManualLocationProvider, Sample};
use tracing::debug;

pub fn load_track(path: &Path) -> Result<Vec<Sample>, String> {
    let content = fs_err::read_to_string(path).map_err(|e| e.to_string())?;
    parse_track(&content)
}

pub fn parse_track(content: &str) -> Result<Vec<Sample>, String> {
    let mut track = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let sample: Sample = serde_json::from_str(line)
            .map_err(|e| format!("Track line {}: {}", index + 1, e))?;
        track.push(sample);
    }

    if track.is_empty() {
        return Err("Track has no fixes".to_string());
    }
    if track.windows(2).any(|pair| pair[1].timestamp < pair[0].timestamp) {
        return Err("Track timestamps must not go backwards".to_string());
    }
    Ok(track)
}

/// Pushes every fix, advancing the clock first. Returns how many fixes the
/// provider accepted; pushing stops once nobody is watching (e.g. the
/// session was auto-aborted).
pub fn replay(clock: &ManualClock, provider: &ManualLocationProvider, track: &[Sample]) -> usize {
    let mut pushed = 0;
    for sample in track {
        clock.advance_to(sample.timestamp);
        if !provider.push(sample.clone()) {
            debug!(pushed, "Provider stopped watching; replay halted");
            break;
        }
        pushed += 1;
    }
    pushed
}
