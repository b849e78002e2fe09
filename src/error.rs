pub type AberrateResult<T> = Result<T, AberrateError>;

#[derive(thiserror::Error, Debug)]
pub enum AberrateError {
    #[error("malformed data file: {0}")]
    MalformedDataFile(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AberrateError {
    pub fn malformed_data_file(msg: impl Into<String>) -> Self {
        Self::MalformedDataFile(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn pipeline(msg: impl Into<String>) -> Self {
        Self::Pipeline(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            AberrateError::malformed_data_file("x")
                .to_string()
                .contains("malformed data file:")
        );
        assert!(
            AberrateError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(
            AberrateError::pipeline("x")
                .to_string()
                .contains("pipeline error:")
        );
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = AberrateError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
