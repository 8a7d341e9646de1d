//! Request and response shapes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, InteropError, Result};

/// Number of DL orientations the solver knows about.
pub const ORIENTATION_COUNT: u8 = 24;

/// A set of orientation indices, passed to the sandbox by value as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrientationSet(u32);

impl OrientationSet {
    /// Every orientation.
    pub const ALL: OrientationSet = OrientationSet((1 << ORIENTATION_COUNT) - 1);

    /// Build a set from indices. An empty slice selects every orientation.
    pub fn from_indices(indices: &[u8]) -> Result<Self> {
        if indices.is_empty() {
            return Ok(Self::ALL);
        }
        let mut bits = 0u32;
        for &index in indices {
            if index >= ORIENTATION_COUNT {
                return Err(InteropError::InvalidOrientation(index));
            }
            bits |= 1 << index;
        }
        Ok(Self(bits))
    }

    /// Raw mask as handed to `solve_fb`.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether `index` is selected.
    pub fn contains(self, index: u8) -> bool {
        index < ORIENTATION_COUNT && self.0 & (1 << index) != 0
    }

    /// Number of selected orientations.
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Whether nothing is selected.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Selected indices in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0..ORIENTATION_COUNT).filter(move |&i| self.contains(i))
    }
}

/// A solve request as it arrives from the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Scramble in move notation
    pub scramble: String,
    /// Orientation indices to solve for; empty means all
    #[serde(default)]
    pub orientations: Vec<u8>,
}

impl Request {
    /// Create a request.
    pub fn new(scramble: impl Into<String>, orientations: impl Into<Vec<u8>>) -> Self {
        Self {
            scramble: scramble.into(),
            orientations: orientations.into(),
        }
    }

    /// Validated orientation mask.
    pub fn orientation_set(&self) -> Result<OrientationSet> {
        OrientationSet::from_indices(&self.orientations)
    }
}

/// The solver's answer, parsed from the JSON text the sandbox returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Response(serde_json::Value);

impl Response {
    /// Parse result text.
    pub fn parse(text: &str) -> Result<Self> {
        let value = serde_json::from_str(text).map_err(DecodeError::from)?;
        Ok(Self(value))
    }

    /// Borrow the JSON value.
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Take the JSON value.
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    /// Deserialize into a typed result.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        let typed = T::deserialize(&self.0).map_err(DecodeError::from)?;
        Ok(typed)
    }
}

impl From<serde_json::Value> for Response {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}
