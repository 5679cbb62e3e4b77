//! Interned physical unit names and the conversions the stream model needs.
//!
//! Units are opaque interned strings. Full dimensional analysis is out of
//! scope; what the streams require is (a) identity, (b) scale conversion
//! inside a handful of families (time intervals, frequencies, energies),
//! and (c) knowing which units are calendar epochs so time text can be
//! re-projected onto them.

use std::collections::HashSet;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::errors::*;
use crate::time::DasTime;

static INTERNED: Lazy<Mutex<HashSet<&'static str>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// An interned unit name. Cheap to copy and compare.
///
/// ```
/// use das_stream_core::units::{self, Units};
///
/// let a = Units::from_str("Hz");
/// assert_eq!(a, units::HERTZ);
/// assert!(a.can_convert(units::KILOHERTZ));
/// assert_eq!(units::KILOHERTZ.convert(2.5, units::HERTZ).unwrap(), 2500.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Units(&'static str);

pub const DIMENSIONLESS: Units = Units("");
/// Times held as broken-down calendar structures.
pub const UTC: Units = Units("UTC");
/// Integral nanoseconds since J2000 on the TT scale, leap-second aware.
pub const TT2000: Units = Units("TT2000");
/// Microseconds since 2000-01-01, ignoring leap seconds.
pub const US2000: Units = Units("us2000");
/// Seconds since 2000-01-01, ignoring leap seconds.
pub const T2000: Units = Units("t2000");
/// Seconds since 1970-01-01, ignoring leap seconds.
pub const S1970: Units = Units("t1970");
/// Days since 1958-01-01.
pub const MJ1958: Units = Units("mj1958");

pub const SECONDS: Units = Units("s");
pub const MILLISECONDS: Units = Units("ms");
pub const MICROSECONDS: Units = Units("us");
pub const NANOSECONDS: Units = Units("ns");
pub const MINUTES: Units = Units("minutes");
pub const HOURS: Units = Units("hr");
pub const DAYS: Units = Units("days");

pub const HERTZ: Units = Units("Hz");
pub const KILOHERTZ: Units = Units("kHz");
pub const MEGAHERTZ: Units = Units("MHz");
pub const GIGAHERTZ: Units = Units("GHz");

pub const EV: Units = Units("eV");
pub const KEV: Units = Units("keV");
pub const MEV: Units = Units("MeV");

/// Electric field spectral density, the common das2 Z-plane unit.
pub const E_SPECDENS: Units = Units("V**2 m**-2 Hz**-1");
/// Magnetic field spectral density.
pub const B_SPECDENS: Units = Units("nT**2 Hz**-1");

#[derive(Clone, Copy, PartialEq, Eq)]
enum Family {
    Interval,
    Frequency,
    Energy,
    Epoch,
    Other,
}

impl Units {
    /// Look up or intern a unit name. Known aliases collapse onto the
    /// canonical spelling so handle comparison keeps working.
    pub fn from_str(s: &str) -> Units {
        let s = s.trim();
        let canon = match s {
            "" | "dimensionless" => return DIMENSIONLESS,
            "s" | "sec" | "seconds" => return SECONDS,
            "ms" | "milliseconds" => return MILLISECONDS,
            "us" | "microseconds" | "\u{3bc}s" => return MICROSECONDS,
            "ns" | "nanoseconds" => return NANOSECONDS,
            "min" | "minutes" => return MINUTES,
            "hr" | "hours" => return HOURS,
            "days" | "day" => return DAYS,
            "Hz" | "hz" => return HERTZ,
            "kHz" => return KILOHERTZ,
            "MHz" => return MEGAHERTZ,
            "GHz" => return GIGAHERTZ,
            "eV" => return EV,
            "keV" => return KEV,
            "MeV" => return MEV,
            "UTC" | "utc" => return UTC,
            "TT2000" | "tt2000" | "TT2K" => return TT2000,
            "us2000" => return US2000,
            "t2000" => return T2000,
            "t1970" | "s1970" => return S1970,
            "mj1958" => return MJ1958,
            other => other,
        };

        let mut set = INTERNED.lock().expect("unit intern table poisoned");
        match set.get(canon) {
            Some(stored) => Units(stored),
            None => {
                let leaked: &'static str = Box::leak(canon.to_string().into_boxed_str());
                set.insert(leaked);
                Units(leaked)
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        self.0
    }

    fn family(self) -> Family {
        match self {
            SECONDS | MILLISECONDS | MICROSECONDS | NANOSECONDS | MINUTES | HOURS | DAYS => {
                Family::Interval
            }
            HERTZ | KILOHERTZ | MEGAHERTZ | GIGAHERTZ => Family::Frequency,
            EV | KEV | MEV => Family::Energy,
            UTC | TT2000 | US2000 | T2000 | S1970 | MJ1958 => Family::Epoch,
            _ => Family::Other,
        }
    }

    /// Scale factor to the base unit of this unit's family.
    fn scale(self) -> f64 {
        match self {
            SECONDS | T2000 | S1970 => 1.0,
            MILLISECONDS => 1e-3,
            MICROSECONDS | US2000 => 1e-6,
            NANOSECONDS | TT2000 => 1e-9,
            MINUTES => 60.0,
            HOURS => 3600.0,
            DAYS | MJ1958 => 86400.0,
            HERTZ => 1.0,
            KILOHERTZ => 1e3,
            MEGAHERTZ => 1e6,
            GIGAHERTZ => 1e9,
            EV => 1.0,
            KEV => 1e3,
            MEV => 1e6,
            _ => 1.0,
        }
    }

    /// Offset, in base-family units, between this epoch and 2000-01-01.
    fn epoch_offset_seconds(self) -> f64 {
        match self {
            S1970 => -946_684_800.0,
            MJ1958 => -15_340.0 * 86400.0,
            _ => 0.0,
        }
    }

    /// Can values in these units be converted to one another?
    pub fn can_convert(self, other: Units) -> bool {
        if self == other {
            return true;
        }
        let (fa, fb) = (self.family(), other.family());
        fa == fb && fa != Family::Other
    }

    /// Does this unit have a calendar representation?
    pub fn has_calendar_rep(self) -> bool {
        self.family() == Family::Epoch
    }

    /// Convert a value in these units to another unit of the same family.
    pub fn convert(self, value: f64, to: Units) -> Result<f64, DasError> {
        if self == to {
            return Ok(value);
        }
        if !self.can_convert(to) {
            return Err(DasError::Value {
                msg: format!("'{}' is not convertible to '{}'", self.0, to.0),
            });
        }
        if self.family() == Family::Epoch {
            // Leap-second aware scales go through the calendar.
            if self == TT2000 || to == TT2000 || self == UTC || to == UTC {
                let dt = self.to_dt(value)?;
                return to.from_dt(&dt);
            }
            let secs = value * self.scale() - self.epoch_offset_seconds();
            return Ok((secs + to.epoch_offset_seconds()) / to.scale());
        }
        Ok(value * self.scale() / to.scale())
    }

    /// Length of one unit step in seconds, for interval arithmetic on
    /// sequences. Epoch units report their tick size.
    pub fn seconds_per_step(self) -> Option<f64> {
        match self.family() {
            Family::Interval | Family::Epoch if self != UTC => Some(self.scale()),
            _ => None,
        }
    }

    /// Project a calendar value onto this epoch.
    pub fn from_dt(self, dt: &DasTime) -> Result<f64, DasError> {
        match self {
            US2000 => Ok(dt.epoch_seconds() * 1e6),
            T2000 => Ok(dt.epoch_seconds()),
            S1970 => Ok(dt.to_s1970()),
            MJ1958 => Ok(dt.to_mj1958()),
            TT2000 => Ok(dt.to_tt2000() as f64),
            _ => Err(DasError::Value {
                msg: format!("'{}' has no calendar representation", self.0),
            }),
        }
    }

    /// Recover a calendar value from a number in this epoch.
    pub fn to_dt(self, value: f64) -> Result<DasTime, DasError> {
        match self {
            US2000 => Ok(DasTime::from_epoch_seconds(value * 1e-6)),
            T2000 => Ok(DasTime::from_epoch_seconds(value)),
            S1970 => Ok(DasTime::from_epoch_seconds(value - 946_684_800.0)),
            MJ1958 => Ok(DasTime::from_epoch_seconds((value - 15_340.0) * 86400.0)),
            TT2000 => Ok(DasTime::from_tt2000(value as i64)),
            _ => Err(DasError::Value {
                msg: format!("'{}' has no calendar representation", self.0),
            }),
        }
    }
}

impl Default for Units {
    fn default() -> Self {
        DIMENSIONLESS
    }
}

impl std::fmt::Display for Units {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_collapses_aliases() {
        assert_eq!(Units::from_str("seconds"), SECONDS);
        assert_eq!(Units::from_str("hz"), HERTZ);
        assert_eq!(Units::from_str(""), DIMENSIONLESS);
        let odd = Units::from_str("furlongs");
        assert_eq!(odd, Units::from_str("furlongs"));
        assert!(!odd.can_convert(SECONDS));
    }

    #[test]
    fn interval_conversions() {
        assert_eq!(MICROSECONDS.convert(1.5e6, SECONDS).unwrap(), 1.5);
        assert_eq!(DAYS.convert(2.0, HOURS).unwrap(), 48.0);
        assert!(SECONDS.convert(1.0, HERTZ).is_err());
    }

    #[test]
    fn epoch_conversions() {
        // 2000-01-02 in various epochs
        assert_eq!(US2000.convert(86400.0e6, T2000).unwrap(), 86400.0);
        assert_eq!(T2000.convert(86400.0, MJ1958).unwrap(), 15341.0);
        let s1970 = T2000.convert(0.0, S1970).unwrap();
        assert_eq!(s1970, 946_684_800.0);
    }

    #[test]
    fn calendar_rep() {
        assert!(US2000.has_calendar_rep());
        assert!(TT2000.has_calendar_rep());
        assert!(!HERTZ.has_calendar_rep());

        let dt = US2000.to_dt(86_400.0 * 1e6).unwrap();
        assert_eq!((dt.year, dt.month, dt.mday), (2000, 1, 2));
        assert_eq!(US2000.from_dt(&dt).unwrap(), 86_400.0 * 1e6);
    }

    #[test]
    fn tt2000_through_calendar() {
        let us = US2000.from_dt(&DasTime::parse("2020-01-01").unwrap()).unwrap();
        let tt = US2000.convert(us, TT2000).unwrap();
        assert_eq!(tt, 631108869184000000.0);
    }
}
