use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    LayerBuilderError(String),

    #[error("{0}")]
    ImageBuilderError(String),

    #[error("{0}")]
    CoreError(#[from] ferry_core::Error),

    #[error("{0}")]
    SerdeYamlError(#[from] serde_yaml::Error),
}
