use crate::job::Job;

/// Hash rate units tools report, with their magnitude in H/s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedUnit {
    Hs,
    KHs,
    MHs,
    GHs,
}

impl SpeedUnit {
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "H/s" => Some(SpeedUnit::Hs),
            "kH/s" => Some(SpeedUnit::KHs),
            "MH/s" => Some(SpeedUnit::MHs),
            "GH/s" => Some(SpeedUnit::GHs),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SpeedUnit::Hs => "H/s",
            SpeedUnit::KHs => "kH/s",
            SpeedUnit::MHs => "MH/s",
            SpeedUnit::GHs => "GH/s",
        }
    }

    pub fn magnitude(self) -> f64 {
        match self {
            SpeedUnit::Hs => 1.0,
            SpeedUnit::KHs => 1e3,
            SpeedUnit::MHs => 1e6,
            SpeedUnit::GHs => 1e9,
        }
    }

    /// Largest unit that keeps a raw H/s rate at or above one.
    pub fn for_rate(hashes_per_sec: f64) -> Self {
        if hashes_per_sec < 1e3 {
            SpeedUnit::Hs
        } else if hashes_per_sec < 1e6 {
            SpeedUnit::KHs
        } else if hashes_per_sec < 1e9 {
            SpeedUnit::MHs
        } else {
            SpeedUnit::GHs
        }
    }

    pub fn convert(value: f64, from: SpeedUnit, to: SpeedUnit) -> f64 {
        value * from.magnitude() / to.magnitude()
    }
}

/// Keeps a job's performance series in the unit of its first sample.
#[derive(Debug, Default)]
pub struct Throughput {
    unit: Option<SpeedUnit>,
}

impl Throughput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit(&self) -> Option<SpeedUnit> {
        self.unit
    }

    /// Record a sample, converting it to the established unit. The job's
    /// performance title decides the unit when it was set by an earlier
    /// run. Returns the stored magnitude.
    pub fn record(&mut self, job: &mut Job, value: f64, unit: SpeedUnit) -> f64 {
        let target = *self
            .unit
            .get_or_insert_with(|| SpeedUnit::parse(&job.performance_title).unwrap_or(unit));
        let normalized = SpeedUnit::convert(value, unit, target);
        job.performance_title = target.label().to_string();
        job.record_performance(normalized);
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn later_samples_follow_first_unit() {
        let mut job = Job::new(Uuid::new_v4(), "crack", "alice");
        let mut series = Throughput::new();

        let first = series.record(&mut job, 129.0, SpeedUnit::MHs);
        assert!((first - 129.0).abs() < EPSILON);

        let second = series.record(&mut job, 559.4, SpeedUnit::KHs);
        assert!((second - 0.5594).abs() < EPSILON);
        assert_eq!(job.performance_title, "MH/s");
        assert_eq!(series.unit(), Some(SpeedUnit::MHs));
    }

    #[test]
    fn conversion_round_trip() {
        let hs = SpeedUnit::convert(129.0, SpeedUnit::MHs, SpeedUnit::Hs);
        assert_eq!(hs, 129_000_000.0);
        let back = SpeedUnit::convert(hs, SpeedUnit::Hs, SpeedUnit::MHs);
        assert!((back - 129.0).abs() < EPSILON);
    }

    #[test]
    fn existing_title_pins_unit() {
        let mut job = Job::new(Uuid::new_v4(), "crack", "alice");
        job.performance_title = "kH/s".into();
        let mut series = Throughput::new();
        let stored = series.record(&mut job, 2.0, SpeedUnit::MHs);
        assert!((stored - 2000.0).abs() < EPSILON);
    }

    #[test]
    fn unit_for_rate() {
        assert_eq!(SpeedUnit::for_rate(999.0), SpeedUnit::Hs);
        assert_eq!(SpeedUnit::for_rate(5_000.0), SpeedUnit::KHs);
        assert_eq!(SpeedUnit::for_rate(2.5e6), SpeedUnit::MHs);
        assert_eq!(SpeedUnit::for_rate(7e9), SpeedUnit::GHs);
        assert_eq!(SpeedUnit::parse("TH/s"), None);
    }
}
