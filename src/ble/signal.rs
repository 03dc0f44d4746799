//! Signal quality classification.

/// Discrete link quality tier derived from RSSI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SignalQuality {
    /// No reading, or a reading outside the valid dBm range.
    #[default]
    Unknown,
    /// Below -85 dBm.
    Poor,
    /// -85 to -71 dBm.
    Fair,
    /// -70 to -51 dBm.
    Good,
    /// -50 to 0 dBm.
    Excellent,
}

impl SignalQuality {
    /// Classify an RSSI reading in dBm.
    ///
    /// Total over the integer domain; positive values are treated as the
    /// platform's "no reading" sentinel.
    pub fn from_rssi(rssi: i32) -> Self {
        match rssi {
            -50..=0 => Self::Excellent,
            -70..=-51 => Self::Good,
            -85..=-71 => Self::Fair,
            i32::MIN..=-86 => Self::Poor,
            _ => Self::Unknown,
        }
    }

    /// Number of signal bars to display (0-4).
    pub fn bars(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Poor => 1,
            Self::Fair => 2,
            Self::Good => 3,
            Self::Excellent => 4,
        }
    }

    /// Check if a usable reading backs this value.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl From<i16> for SignalQuality {
    fn from(rssi: i16) -> Self {
        Self::from_rssi(i32::from(rssi))
    }
}

impl std::fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Poor => write!(f, "Poor"),
            Self::Fair => write!(f, "Fair"),
            Self::Good => write!(f, "Good"),
            Self::Excellent => write!(f, "Excellent"),
        }
    }
}
