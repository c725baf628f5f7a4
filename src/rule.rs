//! Temperature to fan speed conversion rules.
//!
//! A rule is one segment of a fan curve: either a fixed speed over a
//! temperature range, or a linear interpolation between two
//! (temperature, speed) points. A bound left at 0 leaves that side open.

use std::{cmp::Ordering, time::Duration};

use crate::{
    config::RuleCfg,
    duration::parse_optional,
    error::{Error, Result},
};

/// One segment of a fan curve.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use hw_eventsd::config::{FromTo, RuleCfg, SetFromTo};
/// use hw_eventsd::rule::Rule;
///
/// let rule = Rule::new(&RuleCfg {
///     temperature: FromTo { from: 20, to: 80 },
///     fan_speed: SetFromTo { set: 0, from: 50, to: 100 },
///     run_every: "1m".into(),
/// })
/// .unwrap();
/// assert_eq!(rule.calculate_fan_speed(50), (75, Duration::from_secs(60)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub temperature_from: i32,
    pub temperature_to: i32,
    pub fan_from: i32,
    pub fan_to: i32,
    /// Fixed speed; overrides the interpolation when positive.
    pub fan_set: i32,
    /// Sampling interval requested while this rule applies.
    pub run_timer: Duration,
    slope: f64,
    intercept: f64,
}

impl Rule {
    pub fn new(config: &RuleCfg) -> Result<Self> {
        let run_timer = parse_optional(&config.run_every)?.unwrap_or_default();
        let (temperature, fan) = (config.temperature, config.fan_speed);
        if fan.set < 0 || fan.from < 0 || fan.to < 0 {
            return Err(Error::config(format!(
                "negative fan speed in rule {temperature:?} -> {fan:?}"
            )));
        }

        let slope = f64::from(fan.to - fan.from) / f64::from(temperature.to - temperature.from);
        let intercept = f64::from(fan.to) - slope * f64::from(temperature.to);
        Ok(Self {
            temperature_from: temperature.from,
            temperature_to: temperature.to,
            fan_from: fan.from,
            fan_to: fan.to,
            fan_set: fan.set,
            run_timer,
            slope,
            intercept,
        })
    }

    /// True when `temperature` lies within the bounded sides of the range.
    /// Both bounds are inclusive.
    pub fn match_temperature(&self, temperature: i32) -> bool {
        if self.temperature_from > 0 && temperature < self.temperature_from {
            return false;
        }
        if self.temperature_to > 0 && temperature > self.temperature_to {
            return false;
        }
        true
    }

    /// Speed for `temperature` and the sampling interval to use next.
    ///
    /// Out of range temperatures return the closest end of the segment with
    /// no timer request. A degenerate segment returns `(0, 0)`.
    pub fn calculate_fan_speed(&self, temperature: i32) -> (i32, Duration) {
        if self.fan_set > 0 {
            return (self.fan_set, self.run_timer);
        }
        if self.temperature_from > 0 && temperature < self.temperature_from {
            return (self.min_speed(), Duration::ZERO);
        }
        if self.temperature_to > 0 && temperature > self.temperature_to {
            return (self.max_speed(), Duration::ZERO);
        }
        if self.slope == 0.0 || !self.slope.is_finite() {
            return (0, Duration::ZERO);
        }
        let speed = (f64::from(temperature) * self.slope + self.intercept).round();
        (speed as i32, self.run_timer)
    }

    fn min_speed(&self) -> i32 {
        if self.fan_set > 0 {
            self.fan_set
        } else {
            self.fan_from
        }
    }

    fn max_speed(&self) -> i32 {
        if self.fan_set > 0 {
            self.fan_set
        } else {
            self.fan_to
        }
    }

    fn lower_bound(&self) -> i64 {
        if self.temperature_from > 0 {
            i64::from(self.temperature_from)
        } else {
            i64::MIN
        }
    }

    fn upper_bound(&self) -> i64 {
        if self.temperature_to > 0 {
            i64::from(self.temperature_to)
        } else {
            i64::MAX
        }
    }
}

/// Orders rules hottest first: descending by lower bound, then by upper
/// bound. An open lower side sorts last, an open upper side sorts first.
pub fn hottest_first(a: &Rule, b: &Rule) -> Ordering {
    b.lower_bound()
        .cmp(&a.lower_bound())
        .then_with(|| b.upper_bound().cmp(&a.upper_bound()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FromTo, SetFromTo};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn rule(from: i32, to: i32, fan: SetFromTo, run_every: &str) -> Rule {
        Rule::new(&RuleCfg {
            temperature: FromTo { from, to },
            fan_speed: fan,
            run_every: run_every.to_string(),
        })
        .unwrap()
    }

    fn set(speed: i32) -> SetFromTo {
        SetFromTo {
            set: speed,
            from: 0,
            to: 0,
        }
    }

    fn linear(from: i32, to: i32) -> SetFromTo {
        SetFromTo { set: 0, from, to }
    }

    #[test]
    fn fixed_speed_ignores_range() {
        let rule = rule(10, 90, set(50), "");
        for temperature in [0, 10, 50, 90, 100] {
            assert_eq!(rule.calculate_fan_speed(temperature), (50, Duration::ZERO));
        }
    }

    #[test]
    fn linear_interpolation() {
        let rule = rule(20, 80, linear(50, 100), "1m");
        let minute = Duration::from_secs(60);
        assert_eq!(rule.calculate_fan_speed(0), (50, Duration::ZERO));
        assert_eq!(rule.calculate_fan_speed(20), (50, minute));
        assert_eq!(rule.calculate_fan_speed(50), (75, minute));
        assert_eq!(rule.calculate_fan_speed(80), (100, minute));
        assert_eq!(rule.calculate_fan_speed(90), (100, Duration::ZERO));
    }

    #[test]
    fn flat_segment_is_reported_as_zero() {
        let flat = rule(20, 80, linear(60, 60), "");
        assert_eq!(flat.calculate_fan_speed(50), (0, Duration::ZERO));

        let degenerate = rule(40, 40, linear(30, 60), "");
        assert_eq!(degenerate.calculate_fan_speed(40), (0, Duration::ZERO));
    }

    #[test]
    fn match_temperature_bounds() {
        let cases = [
            (FromTo { from: 10, to: 0 }, 7, false),
            (FromTo { from: 0, to: 20 }, 8, true),
            (FromTo { from: 10, to: 20 }, 9, false),
            (FromTo { from: 10, to: 20 }, 10, true),
            (FromTo { from: 10, to: 20 }, 20, true),
            (FromTo { from: 10, to: 20 }, 21, false),
            (FromTo { from: 10, to: 0 }, 22, true),
            (FromTo { from: 0, to: 20 }, 23, false),
        ];
        for (range, temperature, expected) in cases {
            let rule = rule(range.from, range.to, set(10), "");
            assert_eq!(
                rule.match_temperature(temperature),
                expected,
                "{range:?} with {temperature}"
            );
        }
    }

    #[test]
    fn invalid_run_every_is_rejected() {
        let err = Rule::new(&RuleCfg {
            temperature: FromTo { from: 1, to: 2 },
            fan_speed: set(10),
            run_every: "soon".to_string(),
        })
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn negative_speed_is_rejected() {
        let err = Rule::new(&RuleCfg {
            temperature: FromTo { from: 1, to: 2 },
            fan_speed: linear(-10, 20),
            run_every: String::new(),
        })
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn rules_sort_hottest_first() {
        let mut rules = vec![
            rule(20, 40, set(40), ""),
            rule(0, 20, set(20), ""),
            rule(60, 80, set(100), ""),
            rule(80, 0, set(100), ""),
            rule(40, 60, linear(50, 90), ""),
        ];
        rules.sort_by(hottest_first);
        let bounds: Vec<_> = rules
            .iter()
            .map(|r| (r.temperature_from, r.temperature_to))
            .collect();
        assert_eq!(bounds, vec![(80, 0), (60, 80), (40, 60), (20, 40), (0, 20)]);
    }

    #[test]
    fn equal_lower_bounds_prefer_wider_range() {
        let mut rules = vec![rule(40, 50, set(1), ""), rule(40, 0, set(2), "")];
        rules.sort_by(hottest_first);
        assert_eq!(rules[0].fan_set, 2);
    }

    proptest! {
        #[test]
        fn interpolation_stays_within_segment(
            from in 1i32..60,
            span in 1i32..60,
            fan_from in 0i32..50,
            fan_span in 1i32..50,
            offset in 0i32..60,
        ) {
            let to = from + span;
            let rule = rule(from, to, linear(fan_from, fan_from + fan_span), "");
            let temperature = from + offset.min(span);
            let (speed, _) = rule.calculate_fan_speed(temperature);
            prop_assert!(speed >= fan_from && speed <= fan_from + fan_span);
        }
    }
}
