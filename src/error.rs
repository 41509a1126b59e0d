use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid URI")]
    Uri,
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("failed to load asset: {0}")]
    Load(String),
    #[error("asset has no decodable video track")]
    Caps,
    #[error("asset resolution was cancelled")]
    Cancelled,
    #[error("malformed frame: {0}")]
    Frame(String),
    #[error("pixel conversion failed: {0}")]
    Convert(String),
    #[error("player has been disposed")]
    Disposed,
    #[error("failed to sync with worker thread")]
    Sync,
    #[error("invalid framerate: {0}")]
    Framerate(f64),
}

impl Error {
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    pub fn frame(msg: impl Into<String>) -> Self {
        Self::Frame(msg.into())
    }

    /// Whether this error belongs to a single frame rather than the asset.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Self::Frame(_) | Self::Convert(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(Error::load("x").to_string().contains("failed to load asset:"));
        assert!(Error::frame("x").to_string().contains("malformed frame:"));
        assert_eq!(Error::Uri.to_string(), "invalid URI");
    }

    #[test]
    fn frame_errors_are_frame_local() {
        assert!(Error::frame("short buffer").is_frame_local());
        assert!(Error::Convert("nv12".into()).is_frame_local());
        assert!(!Error::load("missing").is_frame_local());
        assert!(!Error::Cancelled.is_frame_local());
    }
}
