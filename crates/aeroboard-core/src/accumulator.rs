use nalgebra::Vector3;

/// Running sum of corrected samples between two reads.
///
/// When `count` reaches the ceiling both sum and count are halved, so the
/// average survives while the magnitude stays bounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accumulator {
    sum: Vector3<f32>,
    count: u16,
    ceiling: u16,
}

impl Accumulator {
    pub fn new(ceiling: u16) -> Self {
        Self {
            sum: Vector3::zeros(),
            count: 0,
            ceiling: ceiling.max(2),
        }
    }

    pub fn add(&mut self, sample: Vector3<f32>) {
        self.sum += sample;
        self.count += 1;
        if self.count >= self.ceiling {
            let halved = self.count / 2;
            self.sum *= halved as f32 / self.count as f32;
            self.count = halved;
        }
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    pub fn sum(&self) -> Vector3<f32> {
        self.sum
    }

    pub fn average(&self) -> Option<Vector3<f32>> {
        (self.count > 0).then(|| self.sum / self.count as f32)
    }

    /// Average of everything accumulated so far, leaving the accumulator empty
    pub fn take_average(&mut self) -> Option<Vector3<f32>> {
        let avg = self.average();
        self.reset();
        avg
    }

    pub fn reset(&mut self) {
        self.sum = Vector3::zeros();
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halving_preserves_average() {
        let mut acc = Accumulator::new(14);
        for i in 0..13 {
            acc.add(Vector3::new(i as f32, 2.0 * i as f32, -1.0));
        }
        let before = (acc.sum() + Vector3::new(13.0, 26.0, -1.0)) / 14.0;
        acc.add(Vector3::new(13.0, 26.0, -1.0));
        assert_eq!(acc.count(), 7);
        let after = acc.average().unwrap();
        assert!((before - after).norm() < 1e-4, "{} vs {}", before, after);
    }

    #[test]
    fn test_odd_ceiling_still_preserves_average() {
        let mut acc = Accumulator::new(9);
        for i in 0..9 {
            acc.add(Vector3::new(i as f32, 0.0, 0.0));
        }
        assert_eq!(acc.count(), 4);
        assert!((acc.average().unwrap().x - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_take_average_resets() {
        let mut acc = Accumulator::new(10);
        assert!(acc.take_average().is_none());
        acc.add(Vector3::new(1.0, 1.0, 1.0));
        acc.add(Vector3::new(3.0, 3.0, 3.0));
        assert_eq!(acc.take_average(), Some(Vector3::new(2.0, 2.0, 2.0)));
        assert_eq!(acc.count(), 0);
    }
}
