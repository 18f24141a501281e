//! Central error handling for the compositing core
//!
//! Provides a unified RenderError enum with consistent categorization
//! across device, render and capability failures.

/// Centralized error type for all compositing operations
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Device error: {0}")]
    Device(String),

    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Shader error: {0}")]
    Shader(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    /// Convenience constructors for common error types
    pub fn device<T: ToString>(msg: T) -> Self {
        RenderError::Device(msg.to_string())
    }

    pub fn capability<T: ToString>(msg: T) -> Self {
        RenderError::Capability(msg.to_string())
    }

    pub fn render<T: ToString>(msg: T) -> Self {
        RenderError::Render(msg.to_string())
    }

    pub fn shader<T: ToString>(msg: T) -> Self {
        RenderError::Shader(msg.to_string())
    }
}

/// Result type alias for compositing operations
pub type RenderResult<T> = Result<T, RenderError>;
