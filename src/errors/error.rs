use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// 通用错误详情类型
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Encoding or decoding a payload.
    Codec,
    /// Subscription protocol: trimming, acknowledgment, group bootstrap.
    Stream,
    /// The ordered-log store rejected or failed a command.
    Store,
    /// Construction-time misuse or an unreadable configuration.
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Codec => write!(f, "codec"),
            ErrorKind::Stream => write!(f, "stream"),
            ErrorKind::Store => write!(f, "store"),
            ErrorKind::Config => write!(f, "config"),
        }
    }
}

pub struct ErrorInner {
    pub kind: ErrorKind,
    pub source: Option<BoxError>,
    pub message: Option<String>,
}

pub struct Error {
    pub inner: Box<ErrorInner>,
}

impl Error {
    pub fn new<E>(kind: ErrorKind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: None,
            }),
        }
    }

    pub fn with_message<E>(kind: ErrorKind, message: impl Into<String>, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: Some(message.into()),
            }),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    pub fn is_codec(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Codec)
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Stream)
    }

    pub fn is_store(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Store)
    }

    pub fn is_config(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Config)
    }

    /// Returns the concrete error this one wraps, if it is of type `E`.
    pub fn downcast_source<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner
            .source
            .as_ref()
            .and_then(|source| source.downcast_ref::<E>())
    }

    pub fn codec_error(&self) -> Option<&CodecError> {
        self.downcast_source::<CodecError>()
    }

    pub fn stream_error(&self) -> Option<&StreamError> {
        self.downcast_source::<StreamError>()
    }

    pub fn store_error(&self) -> Option<&StoreError> {
        self.downcast_source::<StoreError>()
    }

    pub fn is_trimmed(&self) -> bool {
        matches!(self.stream_error(), Some(StreamError::Trimmed))
    }

    pub fn is_ack_not_required(&self) -> bool {
        matches!(self.stream_error(), Some(StreamError::AckNotRequired))
    }

    pub fn is_invalid_stream_id(&self) -> bool {
        matches!(self.stream_error(), Some(StreamError::InvalidStreamId(_)))
    }

    pub fn is_group_bootstrap_failed(&self) -> bool {
        matches!(
            self.stream_error(),
            Some(StreamError::GroupBootstrapFailed { .. })
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.stream_error(), Some(StreamError::Cancelled))
    }

    /// The store answered a read with "nothing arrived before the block expired".
    pub fn is_no_data(&self) -> bool {
        matches!(self.store_error(), Some(StoreError::NoData))
    }

    pub fn is_type_not_registered(&self) -> bool {
        matches!(self.codec_error(), Some(CodecError::TypeNotRegistered(_)))
    }

    pub fn is_type_name_missing(&self) -> bool {
        matches!(self.codec_error(), Some(CodecError::TypeNameMissing))
    }

    pub fn is_data_decode_fail(&self) -> bool {
        matches!(self.codec_error(), Some(CodecError::DataDecodeFail))
    }

    pub fn is_decode_fail(&self) -> bool {
        matches!(self.codec_error(), Some(CodecError::DecodeFail(_)))
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("qstream::Error");
        f.field("kind", &self.inner.kind);
        if let Some(ref message) = self.inner.message {
            f.field("message", message);
        }
        if let Some(ref source) = self.inner.source {
            f.field("source", source);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref message) = self.inner.message {
            write!(f, "{} error: {}", self.inner.kind, message)?;
        } else {
            write!(f, "{} error", self.inner.kind)?;
        }

        if let Some(ref source) = self.inner.source {
            write!(f, ": {source}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|e| &**e as &(dyn StdError + 'static))
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Error::new(ErrorKind::Codec, Some(err))
    }
}

impl From<StreamError> for Error {
    fn from(err: StreamError) -> Self {
        Error::new(ErrorKind::Stream, Some(err))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::new(ErrorKind::Store, Some(err))
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::new(ErrorKind::Config, Some(err))
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::from(StoreError::Redis(err))
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    EncodeFail(#[source] BoxError),
    #[error("decode failed: {0}")]
    DecodeFail(#[source] BoxError),
    #[error("type not registered: {0}")]
    TypeNotRegistered(String),
    #[error("missing type name")]
    TypeNameMissing,
    #[error("payload field missing")]
    DataDecodeFail,
    #[error("type registry must contain at least one type")]
    EmptyRegistry,
    #[error("type registered twice: {0}")]
    DuplicateType(String),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("data trimmed")]
    Trimmed,
    #[error("ack not required for a cursor subscription")]
    AckNotRequired,
    #[error("invalid stream id: index {0} out of range")]
    InvalidStreamId(usize),
    #[error("consumer group {group} bootstrap failed on {key}")]
    GroupBootstrapFailed {
        group: String,
        key: String,
        #[source]
        source: Arc<Error>,
    },
    #[error("read cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool: {0}")]
    Pool(#[source] BoxError),
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error("no data")]
    NoData,
    #[error("unexpected reply: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config load failed: {0}")]
    Load(#[source] BoxError),
    #[error("config parse failed: {0}")]
    Parse(#[source] BoxError),
    #[error("duplicate stream key: {0}")]
    DuplicateStreamKey(String),
    #[error("{ids} cursor ids given for {keys} stream keys")]
    CursorMismatch { keys: usize, ids: usize },
    #[error("connection pool setup failed: {0}")]
    Pool(#[source] BoxError),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::from(ConfigError::Load(err.into()))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::from(ConfigError::Parse(err.into()))
    }
}
