//! Voice resampling kernels
//!
//! Every kernel works on the four most recently decoded samples and a 12-bit fractional position
//! `mu` in `1..=4096`, and returns a sample at twice the 16-bit scale. Intermediate products are
//! computed in 64 bits; the shift sequence is part of the output and must not be rearranged.

use crate::config::InterpolationMode;
use bincode::{Decode, Encode};

const HERMITE_TENSION: i64 = 32768;

/// Last four samples pulled from the decoder, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct SampleHistory {
    pub pv1: i32,
    pub pv2: i32,
    pub pv3: i32,
    pub pv4: i32,
}

impl SampleHistory {
    pub fn push(&mut self, sample: i32) {
        self.pv4 = self.pv3;
        self.pv3 = self.pv2;
        self.pv2 = self.pv1;
        self.pv1 = sample;
    }

    /// Interpolate at sample position `sp`, which is in `-4095..=0` after the history has been
    /// brought up to date.
    pub fn interpolate(&self, mode: InterpolationMode, sp: i32) -> i32 {
        let mu = i64::from(sp) + 4096;
        let (y0, y1, y2, y3) =
            (i64::from(self.pv4), i64::from(self.pv3), i64::from(self.pv2), i64::from(self.pv1));

        let value = match mode {
            InterpolationMode::Nearest => y3 << 1,
            InterpolationMode::Linear => (y3 << 1) - (((y2 - y3) * i64::from(sp)) >> 11),
            InterpolationMode::Cubic => cubic(y0, y1, y2, y3, mu),
            InterpolationMode::Hermite => hermite(y0, y1, y2, y3, mu),
            InterpolationMode::CatmullRom => catmull_rom(y0, y1, y2, y3, mu),
        };

        value as i32
    }
}

fn cubic(y0: i64, y1: i64, y2: i64, y3: i64, mu: i64) -> i64 {
    let a0 = y3 - y2 - y0 + y1;
    let a1 = y0 - y1 - a0;
    let a2 = y2 - y0;

    let mut value = (a0 * mu) >> 12;
    value = ((value + a1) * mu) >> 12;
    value = ((value + a2) * mu) >> 11;

    value + (y1 << 1)
}

fn hermite(y0: i64, y1: i64, y2: i64, y3: i64, mu: i64) -> i64 {
    let m0 = (((y1 - y0) * HERMITE_TENSION) >> 16) + (((y2 - y1) * HERMITE_TENSION) >> 16);
    let m1 = (((y2 - y1) * HERMITE_TENSION) >> 16) + (((y3 - y2) * HERMITE_TENSION) >> 16);

    let mut value = ((2 * y1 + m0 + m1 - 2 * y2) * mu) >> 12;
    value = ((value - 3 * y1 - 2 * m0 - m1 + 3 * y2) * mu) >> 12;
    value = ((value + m0) * mu) >> 11;

    value + (y1 << 1)
}

fn catmull_rom(y0: i64, y1: i64, y2: i64, y3: i64, mu: i64) -> i64 {
    let a3 = -y0 + 3 * y1 - 3 * y2 + y3;
    let a2 = 2 * y0 - 5 * y1 + 4 * y2 - y3;
    let a1 = -y0 + y2;
    let a0 = 2 * y1;

    let mut value = (a3 * mu) >> 12;
    value = ((a2 + value) * mu) >> 12;
    value = ((a1 + value) * mu) >> 12;

    a0 + value
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMOOTH_MODES: [InterpolationMode; 3] =
        [InterpolationMode::Cubic, InterpolationMode::Hermite, InterpolationMode::CatmullRom];

    fn random_history() -> SampleHistory {
        SampleHistory {
            pv1: rand::random::<i16>().into(),
            pv2: rand::random::<i16>().into(),
            pv3: rand::random::<i16>().into(),
            pv4: rand::random::<i16>().into(),
        }
    }

    #[test]
    fn constant_signal_is_preserved() {
        for _ in 0..100 {
            let sample: i32 = rand::random::<i16>().into();
            let history = SampleHistory { pv1: sample, pv2: sample, pv3: sample, pv4: sample };
            let sp = -(rand::random::<i32>() & 0xFFF);

            for mode in [
                InterpolationMode::Nearest,
                InterpolationMode::Linear,
                InterpolationMode::Cubic,
                InterpolationMode::Hermite,
                InterpolationMode::CatmullRom,
            ] {
                assert_eq!(history.interpolate(mode, sp), sample << 1, "{mode:?} sp={sp}");
            }
        }
    }

    #[test]
    fn smooth_kernels_hit_the_knots() {
        for _ in 0..1000 {
            let history = random_history();
            for mode in SMOOTH_MODES {
                // mu = 4096
                assert_eq!(history.interpolate(mode, 0), history.pv2 << 1, "{mode:?}");
                // mu = 0 is never reached by a voice but the polynomial passes through pv3
                assert_eq!(history.interpolate(mode, -4096), history.pv3 << 1, "{mode:?}");
            }
        }
    }

    #[test]
    fn nearest_and_linear() {
        let history = SampleHistory { pv1: 1000, pv2: -1000, pv3: 0, pv4: 0 };
        assert_eq!(history.interpolate(InterpolationMode::Nearest, -2048), 2000);
        assert_eq!(history.interpolate(InterpolationMode::Linear, 0), 2000);
        assert_eq!(history.interpolate(InterpolationMode::Linear, -2048), 0);
        assert_eq!(history.interpolate(InterpolationMode::Linear, -1024), 1000);
    }

    #[test]
    fn full_scale_does_not_wrap() {
        let history = SampleHistory { pv1: 32767, pv2: -32768, pv3: 32767, pv4: -32768 };
        for mode in SMOOTH_MODES {
            for sp in (-4095..=0).step_by(7) {
                let value = history.interpolate(mode, sp);
                assert!(value.abs() < 1 << 20, "{mode:?} sp={sp} value={value}");
            }
        }
    }

    #[test]
    fn push_shifts_history() {
        let mut history = SampleHistory::default();
        for sample in 1..=5 {
            history.push(sample);
        }
        assert_eq!(history, SampleHistory { pv1: 5, pv2: 4, pv3: 3, pv4: 2 });
    }
}
