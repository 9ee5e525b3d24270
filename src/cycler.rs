//! Output cycling and mute toggling
//!
//! Pure functions: given the confirmed current output, the enabled flags and the
//! output that was active before muting, compute the next command to send.

use crate::protocol::{CurrentOutput, OUTPUT_COUNT, Output, OutputIndex};

/// Next output in the cycle, or `None` when every output is disabled
///
/// The scan always steps at least once, so it never hands back the current output
/// while another one is enabled. When muted, scanning resumes from the output that was
/// active before muting. Without any reference point the scan starts just before the
/// first output.
#[must_use]
pub fn next_output(
    current: Option<CurrentOutput>,
    enabled: [bool; OUTPUT_COUNT],
    prev_before_mute: Option<Output>,
) -> Option<Output> {
    if !enabled.contains(&true) {
        return None;
    }

    let start = match current {
        Some(CurrentOutput::Active(output)) => Some(output),
        Some(CurrentOutput::Muted) => prev_before_mute,
        None => None,
    };

    let mut candidate = start.map_or(Output::ALL[0], Output::next);
    while !enabled[candidate.index()] {
        candidate = candidate.next();
    }
    Some(candidate)
}

/// Command for the mute button and the new remembered pre-mute output
///
/// Unmuting without a remembered output restores the first output.
#[must_use]
pub fn toggle_mute(
    current: Option<CurrentOutput>,
    prev_before_mute: Option<Output>,
) -> (OutputIndex, Option<Output>) {
    match current {
        Some(CurrentOutput::Muted) => (
            OutputIndex::Output(prev_before_mute.unwrap_or(Output::ALL[0])),
            prev_before_mute,
        ),
        Some(CurrentOutput::Active(output)) => (OutputIndex::Muted, Some(output)),
        None => (OutputIndex::Muted, prev_before_mute),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const ON: bool = true;
    const OFF: bool = false;

    fn out(index: usize) -> Output {
        Output::new(index).unwrap()
    }

    fn active(index: usize) -> Option<CurrentOutput> {
        Some(CurrentOutput::Active(out(index)))
    }

    fn all_flag_sets() -> impl Iterator<Item = [bool; 4]> {
        (0u8..16).map(|bits| [0, 1, 2, 3].map(|i| bits & (1 << i) != 0))
    }

    #[test]
    fn test_skips_disabled_outputs() {
        let next = next_output(active(0), [ON, OFF, ON, ON], None);
        assert_eq!(next, Some(out(2)));
    }

    #[test]
    fn test_all_disabled_is_a_no_op() {
        for current in [active(0), active(3), Some(CurrentOutput::Muted), None] {
            assert_eq!(next_output(current, [OFF; 4], Some(out(1))), None);
        }
    }

    #[test]
    fn test_muted_resumes_from_output_before_mute() {
        // Scanning from mute's ordinal would wrap to output 0
        let next = next_output(Some(CurrentOutput::Muted), [ON; 4], Some(out(1)));
        assert_eq!(next, Some(out(2)));
    }

    #[rstest]
    #[case(None, [ON, ON, ON, ON], out(0))]
    #[case(None, [OFF, OFF, ON, OFF], out(2))]
    fn test_no_reference_point_picks_first_enabled(
        #[case] prev: Option<Output>,
        #[case] enabled: [bool; 4],
        #[case] expected: Output,
    ) {
        assert_eq!(next_output(None, enabled, prev), Some(expected));
        assert_eq!(next_output(Some(CurrentOutput::Muted), enabled, prev), Some(expected));
    }

    #[test]
    fn test_always_makes_progress_when_current_is_enabled() {
        assert_eq!(next_output(active(1), [ON, ON, OFF, OFF], None), Some(out(0)));
        assert_eq!(next_output(active(3), [ON; 4], None), Some(out(0)));
    }

    #[test]
    fn test_single_enabled_output_returns_itself_after_full_lap() {
        assert_eq!(next_output(active(2), [OFF, OFF, ON, OFF], None), Some(out(2)));
    }

    #[test]
    fn test_result_is_always_enabled() {
        for enabled in all_flag_sets().filter(|flags| flags.contains(&true)) {
            for index in 0..4 {
                let next = next_output(active(index), enabled, None)
                    .expect("at least one output is enabled");
                assert!(enabled[next.index()], "{enabled:?} from {index} gave {next}");
            }
        }
    }

    #[test]
    fn test_toggle_mute_round_trip() {
        for index in 0..4 {
            let current = active(index);
            let (muted, prev) = toggle_mute(current, None);
            assert_eq!(muted, OutputIndex::Muted);
            assert_eq!(prev, Some(out(index)));

            let (restored, prev) = toggle_mute(Some(CurrentOutput::Muted), prev);
            assert_eq!(restored, OutputIndex::Output(out(index)));
            assert_eq!(prev, Some(out(index)));
        }
    }

    #[test]
    fn test_unmute_without_memory_restores_first_output() {
        let (next, prev) = toggle_mute(Some(CurrentOutput::Muted), None);
        assert_eq!(next, OutputIndex::Output(out(0)));
        assert_eq!(prev, None);
    }
}
