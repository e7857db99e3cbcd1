use thiserror::Error;

/// Failures reported to callers of the engine's request interface. None of
/// these leave the engine in a modified state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("invalid job spec: {0}")]
    InvalidJobSpec(String),

    #[error("no healthy accelerators available to fail")]
    NoHealthyAccelerators,

    #[error("{0} disabled in the current configuration")]
    FeatureDisabled(&'static str),
}
