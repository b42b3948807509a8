//! Deterministic capture file names.
//!
//! Host transfer: `capt_PPP_E.ext` (position, bracket step).
//! On device: `capt-SSS-DDDD[+E.E].ext` (sequence index, stage coordinate,
//! exposure value offset).

use crate::sweep::plan::SweepPlan;

/// Name of a capture downloaded to the host.
pub fn host_file_name(plan: &SweepPlan, position: u32, step: u32) -> String {
    format!("capt_{:03}_{}.{}", position, step, plan.file_extension())
}

/// Name pre-assigned to a capture kept on the camera's card.
pub fn device_file_name(plan: &SweepPlan, position: u32, step: u32) -> String {
    format!(
        "capt-{:03}-{:04}[{:+.1}].{}",
        plan.sequence_index(position, step),
        plan.coordinate(position),
        plan.exposure_value(step),
        plan.file_extension()
    )
}

/// Shutter speed as the decimal-seconds string the camera expects.
pub fn format_shutter_speed(seconds: f64) -> String {
    seconds.to_string()
}
