use thiserror::Error;

pub type Result<T> = std::result::Result<T, LanguageError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LanguageError {
    #[error("Unsupported language: {0}. Supported languages: javascript, python, java")]
    Unsupported(String),
}
