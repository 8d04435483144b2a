/// A closed range of ray parameters `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub min: f32,
    pub max: f32,
}

impl Interval {
    /// Create a new interval given min and max values.
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Returns the size of the interval (max - min).
    pub fn size(&self) -> f32 {
        self.max - self.min
    }

    /// Returns true if x is within the interval [min, max] (inclusive).
    pub fn contains(&self, x: f32) -> bool {
        self.min <= x && x <= self.max
    }

    /// Returns true if x is strictly within the interval (min, max).
    pub fn surrounds(&self, x: f32) -> bool {
        self.min < x && x < self.max
    }

    /// Returns true if the interval contains no values.
    ///
    /// NaN bounds compare false and therefore also count as empty.
    pub fn is_empty(&self) -> bool {
        !(self.min <= self.max)
    }

    /// Same interval with the upper bound narrowed to `max`.
    pub fn with_max(&self, max: f32) -> Interval {
        Interval::new(self.min, max)
    }

    /// An empty interval (min > max, contains nothing).
    pub const EMPTY: Interval = Interval {
        min: f32::INFINITY,
        max: f32::NEG_INFINITY,
    };

    /// A universe interval (contains everything).
    pub const UNIVERSE: Interval = Interval {
        min: f32::NEG_INFINITY,
        max: f32::INFINITY,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_size() {
        assert_eq!(Interval::new(2.0, 7.0).size(), 5.0);
        assert_eq!(Interval::new(-5.0, 5.0).size(), 10.0);
    }

    #[test]
    fn test_interval_contains_and_surrounds() {
        let interval = Interval::new(0.0, 10.0);

        assert!(interval.contains(0.0));
        assert!(interval.contains(10.0));
        assert!(!interval.contains(10.1));

        assert!(!interval.surrounds(0.0));
        assert!(interval.surrounds(5.0));
        assert!(!interval.surrounds(10.0));
    }

    #[test]
    fn test_interval_empty() {
        assert!(Interval::EMPTY.is_empty());
        assert!(!Interval::UNIVERSE.is_empty());
        assert!(Interval::new(f32::NAN, 1.0).is_empty());
        assert!(!Interval::new(1.0, 1.0).is_empty());
    }

    #[test]
    fn test_interval_with_max() {
        let narrowed = Interval::new(0.001, f32::INFINITY).with_max(4.0);
        assert_eq!(narrowed, Interval::new(0.001, 4.0));
    }
}
