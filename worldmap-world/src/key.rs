use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Identity of a chunk column in world chunk coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub x: i32,
    pub z: i32,
}

impl ChunkKey {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.z)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("chunk key {0:?} is not of the form \"x,z\"")]
    Malformed(String),
    #[error("chunk key {0:?} has a non-integer coordinate")]
    BadCoordinate(String),
}

impl FromStr for ChunkKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, z) = s
            .split_once(',')
            .ok_or_else(|| KeyParseError::Malformed(s.to_string()))?;
        let x = x.trim().parse().map_err(|_| KeyParseError::BadCoordinate(s.to_string()))?;
        let z = z.trim().parse().map_err(|_| KeyParseError::BadCoordinate(s.to_string()))?;
        Ok(Self { x, z })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_parse() {
        let keys = [
            ChunkKey::new(0, 0),
            ChunkKey::new(-1, 5),
            ChunkKey::new(i32::MAX, i32::MIN),
        ];

        for key in keys {
            let text = key.to_string();
            assert_eq!(text.parse::<ChunkKey>(), Ok(key));
        }
        assert_eq!(ChunkKey::new(-3, 12).to_string(), "-3,12");
    }

    #[test]
    fn test_parse_tolerates_spaces() {
        assert_eq!(" 4 , -7 ".parse::<ChunkKey>(), Ok(ChunkKey::new(4, -7)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!("12".parse::<ChunkKey>(), Err(KeyParseError::Malformed(_))));
        assert!(matches!("a,1".parse::<ChunkKey>(), Err(KeyParseError::BadCoordinate(_))));
        assert!(matches!("1,2,3".parse::<ChunkKey>(), Err(KeyParseError::BadCoordinate(_))));
    }
}
