use heapless::Vec;

/// Fixed-capacity table of sensor instances addressed by a stable index.
pub struct InstanceRegistry<T, const N: usize> {
    entries: Vec<T, N>,
}

impl<T, const N: usize> InstanceRegistry<T, N> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add an instance and return its index.
    ///
    /// # Panics
    ///
    /// When the registry is full. The number of instances is fixed by the
    /// board configuration, so running out is a build error.
    pub fn register(&mut self, entry: T) -> u8 {
        let index = self.entries.len();
        if self.entries.push(entry).is_err() {
            panic!("instance registry full ({} entries)", N);
        }
        index as u8
    }

    pub fn get(&self, index: u8) -> Option<&T> {
        self.entries.get(index as usize)
    }

    pub fn get_mut(&mut self, index: u8) -> Option<&mut T> {
        self.entries.get_mut(index as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

impl<T, const N: usize> Default for InstanceRegistry<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_stable() {
        let mut reg: InstanceRegistry<&str, 3> = InstanceRegistry::new();
        assert_eq!(reg.register("baro0"), 0);
        assert_eq!(reg.register("baro1"), 1);
        assert_eq!(reg.get(1), Some(&"baro1"));
        assert!(reg.get(2).is_none());
    }

    #[test]
    #[should_panic(expected = "instance registry full")]
    fn test_register_past_capacity_panics() {
        let mut reg: InstanceRegistry<u8, 1> = InstanceRegistry::new();
        reg.register(0);
        reg.register(1);
    }
}
