/// How a panning value in `[0, 1]` maps onto left/right gains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanLaw {
    /// Balance control: the far side is attenuated linearly while the near side
    /// stays at unity. Center leaves both sides untouched.
    Balance,
    /// Sine/cosine law scaled by √2 and capped at 1.0: unity on both sides
    /// at center, and the near side stays at unity across the middle half.
    /// Only the far side tapers, along a sine curve.
    SineTaper,
    /// True constant-power law: `left² + right² = 1` everywhere, which puts
    /// the center at -3 dB on each side.
    ConstantPower,
}

impl Default for PanLaw {
    fn default() -> Self {
        Self::Balance
    }
}

impl PanLaw {
    /// Returns the `(left, right)` gains for a panning value.
    ///
    /// Values outside `[0, 1]` are clamped first.
    pub fn gains(self, panning: f32) -> (f32, f32) {
        let p = panning.clamp(0.0, 1.0);
        match self {
            Self::Balance => ((2.0 - 2.0 * p).min(1.0), (2.0 * p).min(1.0)),
            Self::SineTaper => {
                let angle = p * std::f32::consts::FRAC_PI_2;
                (
                    (angle.cos() * std::f32::consts::SQRT_2).min(1.0),
                    (angle.sin() * std::f32::consts::SQRT_2).min(1.0),
                )
            }
            Self::ConstantPower => {
                let angle = p * std::f32::consts::FRAC_PI_2;
                (angle.cos(), angle.sin())
            }
        }
    }
}

/// Where out-of-range samples produced by channel effects get clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClampPolicy {
    /// Effects may overshoot `[-1, 1]`; only the final mix is clamped.
    FinalOnly,
    /// The channel buffer is clamped after every effect in the chain.
    BetweenEffects,
}

impl Default for ClampPolicy {
    fn default() -> Self {
        Self::FinalOnly
    }
}

impl ClampPolicy {
    pub fn clamps_between_effects(self) -> bool {
        matches!(self, Self::BetweenEffects)
    }
}
