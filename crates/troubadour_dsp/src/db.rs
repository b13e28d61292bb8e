//! Decibel Value Type
//!
//! All gains in the mixer are carried as decibels in the closed range
//! [-60, +18]. The bottom of the range is treated as negative infinity:
//! a channel at -60 dB has a linear gain of exactly 0.0, not a very small
//! positive number, so "faded all the way down" really is silence.

use serde::{Deserialize, Serialize};

use crate::error::DspError;

/// Lowest representable level; equivalent to silence.
pub const DB_MIN: f32 = -60.0;

/// Highest representable level (+18 dB of boost).
pub const DB_MAX: f32 = 18.0;

/// A decibel value clamped to [`DB_MIN`], [`DB_MAX`].
///
/// Construction clamps finite input into range; non-finite input is
/// rejected with [`DspError::NonFiniteDb`]. `Db(DB_MIN)` converts to a
/// linear amplitude of exactly 0.0.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Db(f32);

impl Db {
    /// -60 dB, the silence floor.
    pub const SILENCE: Db = Db(DB_MIN);

    /// 0 dB, unity gain.
    pub const UNITY: Db = Db(0.0);

    /// Build from a finite dB value, clamping into range.
    pub fn new(db: f32) -> Result<Self, DspError> {
        if !db.is_finite() {
            return Err(DspError::NonFiniteDb(db));
        }
        Ok(Self(db.clamp(DB_MIN, DB_MAX)))
    }

    /// Build from any value, mapping non-finite input to the silence floor.
    ///
    /// Used for derived observables (meter outputs) where a NaN from
    /// degenerate arithmetic must not escape into snapshots.
    pub fn saturating(db: f32) -> Self {
        if db.is_finite() {
            Self(db.clamp(DB_MIN, DB_MAX))
        } else {
            Self::SILENCE
        }
    }

    /// The raw dB value, already in range.
    pub fn get(self) -> f32 {
        self.0
    }

    /// Convert to linear amplitude: `10^(dB/20)`, with the floor mapping
    /// to exactly 0.0.
    pub fn to_linear(self) -> f32 {
        if self.0 <= DB_MIN {
            0.0
        } else {
            10.0_f32.powf(self.0 / 20.0)
        }
    }

    /// Convert a linear amplitude to dB, flooring at [`DB_MIN`].
    pub fn from_linear(amplitude: f32) -> Self {
        if amplitude <= 0.0 || !amplitude.is_finite() {
            return Self::SILENCE;
        }
        Self::saturating(20.0 * amplitude.log10())
    }

    /// True when this value is at the silence floor.
    pub fn is_silence(self) -> bool {
        self.0 <= DB_MIN
    }
}

impl Default for Db {
    fn default() -> Self {
        Self::UNITY
    }
}

// Persisted documents from older versions stored volumes in a narrower
// range; deserialization clamps rather than rejecting so legacy presets
// keep loading. Non-finite input is still an error.
impl<'de> Deserialize<'de> for Db {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = f32::deserialize(deserializer)?;
        Db::new(raw).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_silence() {
            write!(f, "-inf dB")
        } else {
            write!(f, "{:.1} dB", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamping() {
        assert_eq!(Db::new(0.0).unwrap().get(), 0.0);
        assert_eq!(Db::new(-120.0).unwrap().get(), DB_MIN);
        assert_eq!(Db::new(40.0).unwrap().get(), DB_MAX);
        assert_eq!(Db::new(-59.999).unwrap().get(), -59.999);
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(Db::new(f32::NAN).is_err());
        assert!(Db::new(f32::INFINITY).is_err());
        assert!(Db::new(f32::NEG_INFINITY).is_err());
    }

    #[test]
    fn test_floor_is_silence() {
        assert_eq!(Db::SILENCE.to_linear(), 0.0);
        assert_eq!(Db::new(-60.0).unwrap().to_linear(), 0.0);
        assert!(Db::new(-60.0).unwrap().is_silence());
    }

    #[test]
    fn test_linear_conversion() {
        // 0 dB is unity
        assert!((Db::UNITY.to_linear() - 1.0).abs() < 1e-6);

        // -6 dB is ~0.5012
        let minus_six = Db::new(-6.0).unwrap().to_linear();
        assert!((minus_six - 0.5012).abs() < 0.001);

        // +6 dB is ~1.995
        let plus_six = Db::new(6.0).unwrap().to_linear();
        assert!((plus_six - 1.995).abs() < 0.001);
    }

    #[test]
    fn test_from_linear() {
        assert_eq!(Db::from_linear(0.0), Db::SILENCE);
        assert_eq!(Db::from_linear(-1.0), Db::SILENCE);
        assert!((Db::from_linear(1.0).get()).abs() < 1e-5);
        assert!((Db::from_linear(0.5).get() + 6.02).abs() < 0.01);

        // Tiny amplitudes floor at -60 rather than going to -inf
        assert_eq!(Db::from_linear(1e-9), Db::SILENCE);
    }

    #[test]
    fn test_roundtrip_within_range() {
        for db in [-59.0, -30.0, -6.0, 0.0, 6.0, 18.0] {
            let v = Db::new(db).unwrap();
            let back = Db::from_linear(v.to_linear());
            assert!(
                (back.get() - db).abs() < 0.01,
                "roundtrip of {} gave {}",
                db,
                back.get()
            );
        }
    }

    #[test]
    fn test_serde_clamps_legacy_values() {
        // Older documents could carry values outside [-60, +18]
        let v: Db = serde_json::from_str("-80.0").unwrap();
        assert_eq!(v, Db::SILENCE);

        let v: Db = serde_json::from_str("6.0").unwrap();
        assert_eq!(v.get(), 6.0);

        let json = serde_json::to_string(&Db::new(-12.5).unwrap()).unwrap();
        assert_eq!(json, "-12.5");
    }

    #[test]
    fn test_saturating() {
        assert_eq!(Db::saturating(f32::NAN), Db::SILENCE);
        assert_eq!(Db::saturating(-200.0), Db::SILENCE);
        assert_eq!(Db::saturating(3.0).get(), 3.0);
    }
}
