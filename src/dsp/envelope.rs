//! ADSR envelope for the per-voice VCA.
//!
//! Linear attack to full level, decay toward the sustain level, then
//! release from wherever the level actually was when the gate closed — an
//! early gate during the attack must not jump to the sustain level first.

/// Resolved ADSR parameters in seconds (sustain is a level).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdsrParams {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl AdsrParams {
    pub fn new(attack: f64, decay: f64, sustain: f64, release: f64) -> Self {
        Self {
            attack: attack.max(0.0005),
            decay: decay.max(0.001),
            sustain: sustain.clamp(0.0, 1.0),
            release: release.max(0.001),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Attack,
    Decay,
    Sustain,
    Release,
    Finished,
}

/// Per-voice envelope generator, advanced one sample at a time.
#[derive(Debug, Clone)]
pub struct AdsrEnvelope {
    params: AdsrParams,
    stage: Stage,
    level: f64,
    time_in_stage: f64,
    release_from: f64,
    dt: f64,
}

impl AdsrEnvelope {
    pub fn new(params: AdsrParams, sample_rate: f64) -> Self {
        Self {
            params,
            stage: Stage::Attack,
            level: 0.0,
            time_in_stage: 0.0,
            release_from: params.sustain,
            dt: 1.0 / sample_rate,
        }
    }

    /// Close the gate; the release ramp starts from the current level.
    pub fn release(&mut self) {
        if matches!(self.stage, Stage::Release | Stage::Finished) {
            return;
        }
        self.release_from = self.level;
        self.stage = Stage::Release;
        self.time_in_stage = 0.0;
    }

    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Finished
    }

    pub fn is_releasing(&self) -> bool {
        matches!(self.stage, Stage::Release | Stage::Finished)
    }

    /// Current level without advancing; control-rate consumers (filter
    /// modulators) read this once per block.
    pub fn level(&self) -> f64 {
        self.level
    }

    /// Advance one sample and return the level.
    pub fn process(&mut self) -> f64 {
        match self.stage {
            Stage::Attack => {
                self.time_in_stage += self.dt;
                if self.time_in_stage >= self.params.attack {
                    self.stage = Stage::Decay;
                    self.time_in_stage = 0.0;
                    self.level = 1.0;
                } else {
                    self.level = self.time_in_stage / self.params.attack;
                }
            }
            Stage::Decay => {
                self.time_in_stage += self.dt;
                if self.time_in_stage >= self.params.decay {
                    self.stage = Stage::Sustain;
                    self.time_in_stage = 0.0;
                    self.level = self.params.sustain;
                } else {
                    let progress = self.time_in_stage / self.params.decay;
                    self.level = 1.0 + (self.params.sustain - 1.0) * progress;
                }
            }
            Stage::Sustain => {
                self.level = self.params.sustain;
            }
            Stage::Release => {
                self.time_in_stage += self.dt;
                if self.time_in_stage >= self.params.release {
                    self.stage = Stage::Finished;
                    self.level = 0.0;
                } else {
                    let progress = self.time_in_stage / self.params.release;
                    self.level = self.release_from * (1.0 - progress);
                }
            }
            Stage::Finished => {
                self.level = 0.0;
            }
        }
        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 44100.0;

    #[test]
    fn test_attack_reaches_peak() {
        let mut env = AdsrEnvelope::new(AdsrParams::new(0.01, 0.05, 0.5, 0.1), SR);
        let mut peak: f64 = 0.0;
        for _ in 0..((0.011 * SR) as usize) {
            peak = peak.max(env.process());
        }
        assert!(peak > 0.95, "attack should approach 1.0, got {}", peak);
    }

    #[test]
    fn test_decay_settles_at_sustain() {
        let mut env = AdsrEnvelope::new(AdsrParams::new(0.005, 0.02, 0.6, 0.1), SR);
        for _ in 0..((0.1 * SR) as usize) {
            env.process();
        }
        assert!((env.level() - 0.6).abs() < 0.01);
    }

    #[test]
    fn test_release_captures_exit_level() {
        // Gate closes mid-attack: release must start near the attack level,
        // not at the sustain level
        let mut env = AdsrEnvelope::new(AdsrParams::new(0.1, 0.05, 0.9, 0.1), SR);
        for _ in 0..((0.05 * SR) as usize) {
            env.process();
        }
        let before = env.level();
        assert!(before < 0.7, "still mid-attack");
        env.release();
        let after = env.process();
        assert!(
            (after - before).abs() < 0.01,
            "release should ramp from {} not jump, got {}",
            before,
            after
        );
    }

    #[test]
    fn test_finishes_after_release() {
        let mut env = AdsrEnvelope::new(AdsrParams::new(0.001, 0.01, 0.5, 0.02), SR);
        for _ in 0..((0.05 * SR) as usize) {
            env.process();
        }
        env.release();
        for _ in 0..((0.03 * SR) as usize) {
            env.process();
        }
        assert!(env.is_finished());
        assert_eq!(env.process(), 0.0);
    }
}
