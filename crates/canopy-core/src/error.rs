use crate::TileId;

/// A single record that cannot be interpreted.
///
/// Parse failures are scoped to one tile or one detection: the caller logs
/// them and carries on with the rest of the run.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("tile `{0}` is not in the manifest")]
    UnknownTile(TileId),
    #[error("class id {class_id} is outside the vocabulary of {vocabulary_len} classes")]
    UnknownClass {
        class_id: usize,
        vocabulary_len: usize,
    },
    #[error("confidence {0} is outside [0, 1]")]
    InvalidConfidence(f64),
    #[error("non-finite detection geometry on tile `{0}`")]
    NonFiniteGeometry(TileId),
}

/// Failure to read or write a CSV artifact.
#[derive(thiserror::Error, Debug)]
pub enum TableError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl TableError {
    /// True when the underlying cause is a missing file.
    pub fn is_not_found(&self) -> bool {
        match self {
            TableError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            TableError::Csv(err) => match err.kind() {
                csv::ErrorKind::Io(io) => io.kind() == std::io::ErrorKind::NotFound,
                _ => false,
            },
        }
    }
}
