use rand::Rng;
use std::ops::RangeInclusive;

/// Nags sent before the campaign stops for good.
pub const MAX_NAG_LEVEL: u32 = 5;

/// Gap before the next nag, indexed by the current nagging level.
pub const NAG_LADDER_MINUTES: [i64; 5] = [60, 120, 240, 360, 480];

pub const FOLLOW_UP_DELAY_MINUTES: RangeInclusive<i64> = 5..=10;

/// Important tasks walk the ladder at twice the pace.
pub fn nag_delay_minutes(level: u32, is_important: bool) -> i64 {
    let index = usize::try_from(level)
        .unwrap_or(usize::MAX)
        .min(NAG_LADDER_MINUTES.len() - 1);
    let tier = NAG_LADDER_MINUTES[index];
    if is_important {
        tier / 2
    } else {
        tier
    }
}

/// Uniform in 5..=10 so follow-ups don't land on a mechanical cadence.
pub fn follow_up_delay_minutes<R: Rng>(rng: &mut R) -> i64 {
    rng.gen_range(FOLLOW_UP_DELAY_MINUTES)
}
