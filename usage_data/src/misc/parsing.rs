pub mod duration {
    use std::num::ParseFloatError;

    use derive_more::derive::{Add, Deref, Into};
    use itertools::Itertools as _;
    use thiserror::Error;

    /// What sacct prints for jobs that never started (or never ended).
    pub const UNKNOWN: &str = "Unknown";

    const SECONDS_PER_MINUTE: f64 = 60.0;
    const SECONDS_PER_HOUR: f64 = 3600.0;
    const SECONDS_PER_DAY: f64 = 86400.0;

    /// A sacct time span (`Elapsed`, `CPUTime`), in seconds.
    #[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Deref, Into, Add)]
    pub struct Elapsed(f64);

    impl Elapsed {
        pub const ZERO: Elapsed = Elapsed(0.0);

        pub fn as_seconds(&self) -> f64 {
            self.0
        }

        pub fn as_hours(&self) -> f64 {
            self.0 / SECONDS_PER_HOUR
        }

        /// Parses `[D-]HH:MM:SS`.
        ///
        /// Hours are not capped at 23 (`72:27:37` is valid), and neither are minutes or seconds.
        /// Components may carry a fraction (`00:00:37.5`).
        pub fn parse(input: &str) -> Result<Self, DurationParseError> {
            use DurationParseError::*;
            let input = input.trim();

            if input.is_empty() {
                return Err(Empty);
            }
            if input.eq_ignore_ascii_case(UNKNOWN) {
                return Err(Unknown);
            }

            let (days, clock) = match input.split_once('-') {
                Some((days, clock)) => (component(days, input)?, clock),
                None => (0.0, input),
            };
            let Some((hours, minutes, seconds)) = clock.split(':').collect_tuple() else {
                return Err(Invalid(input.to_owned()));
            };

            let total = days * SECONDS_PER_DAY
                + component(hours, input)? * SECONDS_PER_HOUR
                + component(minutes, input)? * SECONDS_PER_MINUTE
                + component(seconds, input)?;
            if !total.is_finite() {
                return Err(OutOfRange(input.to_owned()));
            }

            Ok(Elapsed(total))
        }

        /// Total view of [`Elapsed::parse`]: anything unparseable is zero seconds.
        pub fn seconds_or_zero(input: &str) -> f64 {
            Self::parse(input).map_or(0.0, |elapsed| elapsed.as_seconds())
        }
    }

    fn component(part: &str, input: &str) -> Result<f64, DurationParseError> {
        let value = part
            .parse::<f64>()
            .map_err(|source| DurationParseError::InvalidComponent {
                input: input.to_owned(),
                source,
            })?;
        if !value.is_finite() || value < 0.0 {
            return Err(DurationParseError::OutOfRange(input.to_owned()));
        }
        Ok(value)
    }

    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum DurationParseError {
        #[error("trying to parse an empty string")]
        Empty,
        #[error("duration is `Unknown`")]
        Unknown,
        #[error("`{0}` is not in `[D-]HH:MM:SS` format")]
        Invalid(String),
        #[error("`{input}`: component is not a number")]
        InvalidComponent {
            input: String,
            #[source]
            source: ParseFloatError,
        },
        #[error("`{0}`: components have to be finite and non-negative")]
        OutOfRange(String),
    }
}

pub mod memory {
    use std::num::ParseFloatError;

    use derive_more::derive::{Add, Deref, Into};
    use thiserror::Error;

    /// Memory amount in GiB (sacct's `K`/`M`/`G` are binary units).
    #[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Deref, Into, Add)]
    pub struct Memory(f64);

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Unit {
        Bytes,
        Kib,
        Mib,
        Gib,
    }

    impl Unit {
        fn to_gib(self, value: f64) -> f64 {
            match self {
                Unit::Kib => value / 1024f64 / 1024f64,
                Unit::Mib => value / 1024f64,
                Unit::Gib => value,
                // NOTE scaled by 1024^2 like kibibytes, not 1024^3. Existing reports were computed
                // this way, so a bare number stays "bytes" in name only.
                Unit::Bytes => value / 1024f64 / 1024f64,
            }
        }
    }

    impl Memory {
        pub const ZERO: Memory = Memory(0.0);

        pub fn from_gib(gib: f64) -> Self {
            Self(gib)
        }

        pub fn as_gib(&self) -> f64 {
            self.0
        }

        pub fn as_mib(&self) -> f64 {
            self.0 * 1024f64
        }

        /// `<number>[K|M|G]`, case-insensitive. No suffix means bytes, which only get divided by
        /// 1024^2 on the way to GiB.
        ///
        /// A blank field (sacct leaves `MaxRSS` blank for jobs that never ran) is
        /// [`MemoryParseError::Empty`], which callers count as 0 without a warning.
        pub fn parse(input: &str) -> Result<Memory, MemoryParseError> {
            use MemoryParseError::*;
            let input = input.trim().to_uppercase();
            if input.is_empty() {
                return Err(Empty);
            }

            let (scalar, unit) = if let Some(scalar) = input.strip_suffix('K') {
                (scalar, Unit::Kib)
            } else if let Some(scalar) = input.strip_suffix('M') {
                (scalar, Unit::Mib)
            } else if let Some(scalar) = input.strip_suffix('G') {
                (scalar, Unit::Gib)
            } else {
                (input.as_str(), Unit::Bytes)
            };

            let value = scalar.trim().parse::<f64>()?;
            if !value.is_finite() || value < 0.0 {
                return Err(OutOfRange(input.clone()));
            }

            Ok(Memory(unit.to_gib(value)))
        }

        /// `ReqMem` of older Slurm versions carries a per-core/per-node marker (`4000Mc`, `4000Mn`).
        pub fn parse_requested(input: &str) -> Result<Memory, MemoryParseError> {
            let input = input.trim();
            let without_marker = match input.strip_suffix(|c: char| c == 'c' || c == 'n') {
                Some(rest) if rest.ends_with(|c: char| matches!(c.to_ascii_uppercase(), 'K' | 'M' | 'G')) => rest,
                _ => input,
            };
            Self::parse(without_marker)
        }

        /// Total view of [`Memory::parse`]: anything unparseable is 0 GiB.
        pub fn gib_or_zero(input: &str) -> f64 {
            Self::parse(input).map_or(0.0, |mem| mem.as_gib())
        }

        /// Total view of [`Memory::parse_requested`].
        pub fn requested_gib_or_zero(input: &str) -> f64 {
            Self::parse_requested(input).map_or(0.0, |mem| mem.as_gib())
        }
    }

    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum MemoryParseError {
        #[error("trying to parse an empty string")]
        Empty,
        #[error("scalar part is not a number")]
        InvalidNumber(#[from] ParseFloatError),
        #[error("`{0}`: memory has to be finite and non-negative")]
        OutOfRange(String),
    }
}

pub mod tres {
    use serde::Deserialize;

    const SECONDS_PER_HOUR: f64 = 3600.0;

    /// Which `AllocTRES` key carries the GPU count.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum GpuKey {
        /// exactly `gres/gpu` (allocation exports)
        Gres,
        /// `gpu` or anything ending in `/gpu` (raw sacct logs)
        #[default]
        Any,
    }

    impl GpuKey {
        fn matches(self, key: &str) -> bool {
            match self {
                GpuKey::Gres => key == "gres/gpu",
                GpuKey::Any => key == "gpu" || key.ends_with("/gpu"),
            }
        }
    }

    /// GPU count out of a TRES descriptor like `billing=1,cpu=1,gres/gpu=2,mem=8.01G,node=1`.
    ///
    /// Only the digits right after the key count, the first matching key wins, no key means 0.
    /// Typed keys (`gres/gpu:a100=2`) are not the count.
    pub fn gpu_count(descriptor: &str, key: GpuKey) -> u32 {
        descriptor
            .split(',')
            .filter_map(|token| token.split_once('='))
            .find(|(k, _)| key.matches(k.trim()))
            .map(|(_, value)| leading_digits(value.trim()))
            .unwrap_or(0)
    }

    fn leading_digits(value: &str) -> u32 {
        let end = value
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(value.len());
        value[..end].parse().unwrap_or(0)
    }

    pub fn gpu_hours(gpu_count: u32, elapsed_seconds: f64) -> f64 {
        f64::from(gpu_count) * (elapsed_seconds / SECONDS_PER_HOUR)
    }
}

pub use duration::{DurationParseError, Elapsed};
pub use memory::{Memory, MemoryParseError};
pub use tres::{gpu_count, gpu_hours, GpuKey};

#[allow(non_snake_case, non_upper_case_globals)]
#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;
    const ε: f64 = 0.0000000001;

    #[test]
    fn Elapsed__parse__hours_above_a_day() {
        assert_eq!(Elapsed::seconds_or_zero("72:27:37"), 260857.0);
    }

    #[test]
    fn Elapsed__parse__with_days() {
        assert_eq!(Elapsed::seconds_or_zero("1-00:27:37"), 88057.0);
        assert_eq!(Elapsed::seconds_or_zero("2-01:00:00"), 2.0 * 86400.0 + 3600.0);
    }

    #[test]
    fn Elapsed__parse__fractional_seconds() {
        assert!((Elapsed::seconds_or_zero("00:00:37.5") - 37.5).abs() < ε);
    }

    #[test]
    fn Elapsed__parse__unknown_and_empty() {
        assert_eq!(Elapsed::parse("Unknown"), Err(DurationParseError::Unknown));
        assert_eq!(Elapsed::parse("   "), Err(DurationParseError::Empty));
        assert_eq!(Elapsed::seconds_or_zero("Unknown"), 0.0);
        assert_eq!(Elapsed::seconds_or_zero(""), 0.0);
    }

    #[test]
    fn Elapsed__parse__malformed() {
        assert!(matches!(Elapsed::parse("27:37"), Err(DurationParseError::Invalid(_))));
        assert!(matches!(Elapsed::parse("1:2:3:4"), Err(DurationParseError::Invalid(_))));
        assert!(matches!(
            Elapsed::parse("aa:bb:cc"),
            Err(DurationParseError::InvalidComponent { .. })
        ));
        assert!(matches!(Elapsed::parse("inf:00:00"), Err(DurationParseError::OutOfRange(_))));
        assert!(matches!(Elapsed::parse("NaN:00:00"), Err(DurationParseError::OutOfRange(_))));
        assert_eq!(Elapsed::seconds_or_zero("-1:00:00"), 0.0);
        assert_eq!(Elapsed::seconds_or_zero("1-2-00:00:00"), 0.0);
    }

    #[test]
    fn Elapsed__as_hours() {
        let elapsed = Elapsed::parse("01:30:00").expect("valid duration");
        assert!((elapsed.as_hours() - 1.5).abs() < ε);
    }

    #[test]
    fn Memory__parse__units() {
        assert!((Memory::gib_or_zero("4096K") - 4096.0 / 1024.0 / 1024.0).abs() < ε);
        assert!((Memory::gib_or_zero("512M") - 0.5).abs() < ε);
        assert!((Memory::gib_or_zero("8G") - 8.0).abs() < ε);
        assert!((Memory::gib_or_zero("8.01g") - 8.01).abs() < ε);
    }

    #[test]
    fn Memory__parse__bare_number_is_scaled_like_bytes_quirk() {
        assert!((Memory::gib_or_zero("1048576") - 1.0).abs() < ε);
    }

    #[test]
    fn Memory__parse__garbage_is_zero() {
        assert_eq!(Memory::parse(""), Err(MemoryParseError::Empty));
        assert_eq!(Memory::gib_or_zero(""), 0.0);
        assert_eq!(Memory::gib_or_zero("TIEOUT"), 0.0);
        assert_eq!(Memory::gib_or_zero("10T"), 0.0);
        assert_eq!(Memory::gib_or_zero("-5G"), 0.0);
        assert_eq!(Memory::gib_or_zero("infG"), 0.0);
        assert_eq!(Memory::gib_or_zero("G"), 0.0);
    }

    #[test]
    fn Memory__parse_requested__strips_core_and_node_marker() {
        assert!((Memory::requested_gib_or_zero("4096Mn") - 4.0).abs() < ε);
        assert!((Memory::requested_gib_or_zero("2Gc") - 2.0).abs() < ε);
        assert!((Memory::requested_gib_or_zero("16G") - 16.0).abs() < ε);
        assert_eq!(Memory::requested_gib_or_zero("n"), 0.0);
    }

    #[test]
    fn gpu_count__gres_key() {
        let tres = "billing=1,cpu=1,gres/gpu=2,mem=8.01G,node=1";
        assert_eq!(gpu_count(tres, GpuKey::Gres), 2);
        assert_eq!(gpu_count(tres, GpuKey::Any), 2);
    }

    #[test]
    fn gpu_count__absent_key() {
        assert_eq!(gpu_count("billing=1,cpu=1,mem=8.01G,node=1", GpuKey::Any), 0);
        assert_eq!(gpu_count("", GpuKey::Gres), 0);
        assert_eq!(gpu_count("gres/gpu=", GpuKey::Gres), 0);
    }

    #[test]
    fn gpu_count__ignores_trailing_qualifier() {
        assert_eq!(gpu_count("cpu=4,gres/gpu=3node=1", GpuKey::Gres), 3);
        assert_eq!(gpu_count("cpu=4,gpu=12(IDX:0-11)", GpuKey::Any), 12);
    }

    #[test]
    fn gpu_count__key_formats() {
        assert_eq!(gpu_count("cpu=1,gpu=4", GpuKey::Gres), 0);
        assert_eq!(gpu_count("cpu=1,gpu=4", GpuKey::Any), 4);
        assert_eq!(gpu_count("gres/gpu:a100=2,cpu=1", GpuKey::Any), 0);
        assert_eq!(gpu_count("gres/gpu:a100=2,gres/gpu=2", GpuKey::Gres), 2);
    }

    #[test]
    fn gpu_hours__zero_when_elapsed_unparseable() {
        assert_eq!(gpu_hours(4, Elapsed::seconds_or_zero("Unknown")), 0.0);
        assert!((gpu_hours(2, 5400.0) - 3.0).abs() < ε);
    }

    proptest! {
        #[test]
        fn Elapsed__seconds_or_zero__is_total(input in ".*") {
            let seconds = Elapsed::seconds_or_zero(&input);
            prop_assert!(seconds.is_finite() && seconds >= 0.0);
        }

        #[test]
        fn Elapsed__seconds_or_zero__is_total_for_clock_like_input(input in "[0-9eE.+-]{0,4}(-?[0-9a-z.:-]{0,4}){0,4}") {
            let seconds = Elapsed::seconds_or_zero(&input);
            prop_assert!(seconds.is_finite() && seconds >= 0.0);
        }

        #[test]
        fn Memory__gib_or_zero__is_total(input in "[0-9a-zA-Z.+-]{0,12}") {
            let gib = Memory::gib_or_zero(&input);
            prop_assert!(gib.is_finite() && gib >= 0.0);
            let requested = Memory::requested_gib_or_zero(&input);
            prop_assert!(requested.is_finite() && requested >= 0.0);
        }

        #[test]
        fn gpu_count__never_panics(input in ".*") {
            let _ = gpu_count(&input, GpuKey::Any);
            let _ = gpu_count(&input, GpuKey::Gres);
        }
    }
}
