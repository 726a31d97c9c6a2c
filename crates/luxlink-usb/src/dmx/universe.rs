//! The DMX universe buffer

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::DriverError;

/// Number of channels in one DMX512 universe
pub const UNIVERSE_SIZE: usize = 512;

/// DMX start code for a standard dimmer frame
pub const DMX_START_CODE: u8 = 0x00;

/// One universe of 512 channel values. Index 0 is DMX channel 1.
///
/// The buffer is owned by the caller; drivers only read it at send time.
#[derive(Clone)]
pub struct Universe {
    channels: [u8; UNIVERSE_SIZE],
}

/// A universe shared between its owner (write side) and an output scheduler
/// (read side).
///
/// The lock makes the sharing sound, not concurrent-writer-safe: usage is
/// single-writer/single-reader by contract. The scheduler takes the read
/// lock once per tick, so writers should hold the write lock only briefly.
pub type SharedUniverse = Arc<RwLock<Universe>>;

impl Universe {
    /// Create a universe with all channels at zero.
    pub fn new() -> Self {
        Self {
            channels: [0u8; UNIVERSE_SIZE],
        }
    }

    /// Set a channel value. Channels are 1-indexed (1-512); out-of-range
    /// channels are ignored.
    pub fn set(&mut self, channel: u16, value: u8) {
        let index = (channel as usize).wrapping_sub(1);
        if channel >= 1 && index < UNIVERSE_SIZE {
            self.channels[index] = value;
        }
    }

    /// Get a channel value (1-indexed); out-of-range channels read as zero.
    pub fn get(&self, channel: u16) -> u8 {
        let index = (channel as usize).wrapping_sub(1);
        if channel >= 1 && index < UNIVERSE_SIZE {
            self.channels[index]
        } else {
            0
        }
    }

    /// Set all channels to the same value.
    pub fn fill(&mut self, value: u8) {
        self.channels.fill(value);
    }

    /// Raw view of all 512 channel values.
    pub fn channels(&self) -> &[u8; UNIVERSE_SIZE] {
        &self.channels
    }

    /// Mutable raw view of all 512 channel values.
    pub fn channels_mut(&mut self) -> &mut [u8; UNIVERSE_SIZE] {
        &mut self.channels
    }

    /// Wrap the universe for sharing with an output scheduler.
    pub fn into_shared(self) -> SharedUniverse {
        Arc::new(RwLock::new(self))
    }
}

impl Default for Universe {
    fn default() -> Self {
        Self::new()
    }
}

impl From<[u8; UNIVERSE_SIZE]> for Universe {
    fn from(channels: [u8; UNIVERSE_SIZE]) -> Self {
        Self { channels }
    }
}

impl TryFrom<&[u8]> for Universe {
    type Error = DriverError;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        let channels: [u8; UNIVERSE_SIZE] = data
            .try_into()
            .map_err(|_| DriverError::InvalidUniverseSize(data.len()))?;
        Ok(Self { channels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_are_one_indexed() {
        let mut universe = Universe::new();
        universe.set(1, 255);
        universe.set(512, 128);

        assert_eq!(universe.channels()[0], 255);
        assert_eq!(universe.channels()[511], 128);
        assert_eq!(universe.get(1), 255);
        assert_eq!(universe.get(512), 128);
    }

    #[test]
    fn test_out_of_range_channels_are_ignored() {
        let mut universe = Universe::new();
        universe.set(0, 255);
        universe.set(513, 255);

        assert!(universe.channels().iter().all(|&v| v == 0));
        assert_eq!(universe.get(0), 0);
        assert_eq!(universe.get(513), 0);
    }

    #[test]
    fn test_try_from_rejects_wrong_lengths() {
        assert!(matches!(
            Universe::try_from(&[0u8; 100][..]),
            Err(DriverError::InvalidUniverseSize(100))
        ));
        assert!(matches!(
            Universe::try_from(&[0u8; 513][..]),
            Err(DriverError::InvalidUniverseSize(513))
        ));
        assert!(Universe::try_from(&[0u8; 512][..]).is_ok());
    }
}
