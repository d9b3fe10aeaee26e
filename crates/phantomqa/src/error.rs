//! Error taxonomy shared by every analysis stage.

use serde::ser::SerializeStruct;

/// Identifies the unit of work a failure belongs to.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Unit {
    /// One image of a batch, by identifier.
    Image(String),
    /// One requested depth, in millimetres.
    Depth(f64),
    /// One well of a dot grid, by grid index.
    Well(usize),
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image(id) => write!(f, "image '{id}'"),
            Self::Depth(d) => write!(f, "depth {d:.3} mm"),
            Self::Well(i) => write!(f, "well #{i}"),
        }
    }
}

/// Coarse error class, mirroring the variants of [`QalError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    RoiNotFound,
    DetectionFailed,
    Fit,
    Batch,
    Io,
}

/// Errors produced by phantom analysis.
#[derive(Debug, thiserror::Error)]
pub enum QalError {
    /// Input violates a precondition: dimension mismatch, depth out of range,
    /// too few wells, invalid configuration.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The depth-phantom channel could not be located unambiguously.
    #[error("phantom channel not found: {0}")]
    RoiNotFound(String),
    /// The well grid could not be detected or indexed consistently.
    #[error("dot-grid detection failed: {0}")]
    DetectionFailed(String),
    /// A numeric fit was degenerate or produced non-finite values.
    #[error("fit failed: {0}")]
    Fit(String),
    /// Several independent units failed; every failure is listed.
    #[error("{} of {} units failed: {}", .failures.len(), .total, summarize(.failures))]
    Batch {
        /// Number of units in the batch.
        total: usize,
        /// One entry per failed unit, in input order.
        failures: Vec<UnitFailure>,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl QalError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::RoiNotFound(_) => ErrorKind::RoiNotFound,
            Self::DetectionFailed(_) => ErrorKind::DetectionFailed,
            Self::Fit(_) => ErrorKind::Fit,
            Self::Batch { .. } => ErrorKind::Batch,
            Self::Io(_) | Self::Json(_) | Self::Image(_) => ErrorKind::Io,
        }
    }
}

/// A failure attributed to one unit of a batch.
#[derive(Debug)]
pub struct UnitFailure {
    pub unit: Unit,
    pub error: QalError,
}

impl UnitFailure {
    pub fn new(unit: Unit, error: QalError) -> Self {
        Self { unit, error }
    }
}

impl std::fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.unit, self.error)
    }
}

// Errors are not serde types; failures are written as unit + kind + message.
impl serde::Serialize for UnitFailure {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("UnitFailure", 3)?;
        s.serialize_field("unit", &self.unit)?;
        s.serialize_field("kind", &self.error.kind())?;
        s.serialize_field("message", &self.error.to_string())?;
        s.end()
    }
}

fn summarize(failures: &[UnitFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T, E = QalError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_message_lists_every_unit() {
        let err = QalError::Batch {
            total: 3,
            failures: vec![
                UnitFailure::new(
                    Unit::Image("a.png".into()),
                    QalError::DetectionFailed("found 8 wells, expected 9".into()),
                ),
                UnitFailure::new(Unit::Depth(7.5), QalError::invalid("outside range")),
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 of 3 units failed"));
        assert!(msg.contains("image 'a.png'"));
        assert!(msg.contains("depth 7.500 mm"));
        assert_eq!(err.kind(), ErrorKind::Batch);
    }

    #[test]
    fn unit_failure_serializes_message() {
        let f = UnitFailure::new(Unit::Well(4), QalError::Fit("singular".into()));
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["kind"], "fit");
        assert_eq!(json["unit"]["kind"], "well");
        assert_eq!(json["unit"]["id"], 4);
        assert_eq!(json["message"], "fit failed: singular");
    }
}
