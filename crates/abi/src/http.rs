use thiserror::Error;

/// Failure to lift a flattened request into its structured form.
///
/// Malformed flat input is a host-side programming error rather than a
/// recoverable condition, but it is still reported instead of being
/// silently misread.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unknown method discriminant: {0}")]
    UnknownMethod(u32),

    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("{0} entry is missing the name/value separator")]
    MissingSeparator(&'static str),

    #[error("status {0} does not fit in 16 bits")]
    StatusOutOfRange(usize),
}

/// Request method, wire discriminants 0..=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Method {
    Get = 0,
    Post = 1,
    Put = 2,
    Delete = 3,
    Patch = 4,
}

impl Method {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        }
    }
}

impl TryFrom<u32> for Method {
    type Error = DecodeError;

    fn try_from(raw: u32) -> Result<Self, DecodeError> {
        match raw {
            0 => Ok(Self::Get),
            1 => Ok(Self::Post),
            2 => Ok(Self::Put),
            3 => Ok(Self::Delete),
            4 => Ok(Self::Patch),
            other => Err(DecodeError::UnknownMethod(other)),
        }
    }
}

/// An incoming request as seen by guest code.
///
/// Headers and parameters are ordered and not deduplicated. `params` and
/// `body` distinguish absent from empty; the flat encoding preserves that
/// distinction with a presence tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub params: Option<Vec<(String, String)>>,
    pub body: Option<Vec<u8>>,
}

/// The value a guest handler produces for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Option<Vec<(String, String)>>,
    pub body: Option<Vec<u8>>,
}
