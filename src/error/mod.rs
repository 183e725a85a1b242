use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Record error: {0}")]
    Record(String),

    #[error("Source view index {0} should be less than the view count {1}")]
    SourceViewOutOfRange(u32, usize),

    #[error("Style encoder weights at {0:?} cannot be loaded: {1}")]
    StyleEncoderWeights(PathBuf, String),

    #[error("Unencoded state: the radiance field should be encoded before querying")]
    UnencodedState,

    #[error("Validation error: {0} should be {1}")]
    Validation(String, String),
}

impl From<burn::tensor::DataError> for Error {
    fn from(error: burn::tensor::DataError) -> Self {
        Self::Data(format!("{error:?}"))
    }
}

impl From<burn::record::RecorderError> for Error {
    fn from(error: burn::record::RecorderError) -> Self {
        Self::Record(format!("{error:?}"))
    }
}
