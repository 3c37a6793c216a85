//! Error types for the encoder module.

use thiserror::Error;

/// Errors that can occur while normalizing encoder output.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// Input contained no NAL units.
    #[error("No NAL units found in {0} bytes of encoder output")]
    NoNalUnits(usize),

    /// Header bytes lacked an SPS or PPS.
    #[error("Missing parameter sets: {0}")]
    MissingParameterSets(&'static str),

    /// A parameter set is too short or too long to be framed.
    #[error("Invalid parameter set: {0}")]
    InvalidParameterSet(String),

    /// Invalid input data.
    #[error("Invalid input data: {0}")]
    InvalidInput(String),
}
