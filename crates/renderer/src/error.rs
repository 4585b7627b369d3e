use thiserror::Error;

use crate::source::StageKind;

/// Failure to locate both stages inside a generated source blob.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("couldn't parse vertex and fragment shaders: missing `{marker}` marker")]
    MissingMarker { marker: &'static str },
    #[error("couldn't parse vertex and fragment shaders: fragment marker precedes vertex marker")]
    MarkersOutOfOrder,
    #[error("couldn't parse vertex and fragment shaders: {stage} stage is empty")]
    EmptyStage { stage: StageKind },
}

/// The drawable surface or graphics context could not provide a resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("graphics context unavailable: {0}")]
    Context(String),
    #[error("drawable surface unavailable: {0}")]
    Surface(String),
    #[error("failed to allocate {what}: {reason}")]
    Allocation { what: &'static str, reason: String },
}

/// Everything that can stop a source blob from becoming a running program.
///
/// `Compile` and `Link` carry the driver's diagnostic untouched; it is what
/// the user sees and what gets sent back to the generator for a fix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("{stage} shader compilation error: {diagnostic}")]
    Compile { stage: StageKind, diagnostic: String },
    #[error("program linking error: {diagnostic}")]
    Link { diagnostic: String },
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl BuildError {
    /// Raw driver text for compile/link failures, `None` for everything else.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            BuildError::Compile { diagnostic, .. } | BuildError::Link { diagnostic } => {
                Some(diagnostic.as_str())
            }
            BuildError::Parse(_) | BuildError::Resource(_) => None,
        }
    }

    /// Whether the generator can plausibly repair the source that caused this.
    pub fn is_fixable(&self) -> bool {
        !matches!(self, BuildError::Resource(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_message_embeds_diagnostic_verbatim() {
        let err = BuildError::Compile {
            stage: StageKind::Fragment,
            diagnostic: "ERROR: 0:3: 'foo' : undeclared identifier".into(),
        };
        assert_eq!(
            err.to_string(),
            "fragment shader compilation error: ERROR: 0:3: 'foo' : undeclared identifier"
        );
        assert_eq!(
            err.diagnostic(),
            Some("ERROR: 0:3: 'foo' : undeclared identifier")
        );
    }

    #[test]
    fn resource_errors_are_not_fixable() {
        let err = BuildError::from(ResourceError::Surface("lost".into()));
        assert!(!err.is_fixable());
        assert!(err.diagnostic().is_none());
        assert!(BuildError::from(ParseError::MarkersOutOfOrder).is_fixable());
    }
}
