use std::fmt;

/// The status of a response received for a transmission.
///
/// Besides regular HTTP status codes, this includes the backend's extended throttling code and
/// a sentinel for transport failures that did not yield a response at all.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResponseStatus(u16);

impl ResponseStatus {
    /// All items were accepted.
    pub const SUCCESS: Self = Self(200);
    /// Some items were accepted, the response lists the rejected ones.
    pub const PARTIAL_SUCCESS: Self = Self(206);
    /// The payload was malformed or credentials are invalid.
    pub const BAD_REQUEST: Self = Self(400);
    /// Authentication is required or has failed.
    pub const UNAUTHORIZED: Self = Self(401);
    /// The credentials do not permit ingestion.
    pub const FORBIDDEN: Self = Self(403);
    /// The backend timed out waiting for the request.
    pub const REQUEST_TIMEOUT: Self = Self(408);
    /// Too many requests, throttled for a short period.
    pub const TOO_MANY_REQUESTS: Self = Self(429);
    /// Too many requests over an extended period. The backend asks to drop data.
    pub const TOO_MANY_REQUESTS_EXTENDED: Self = Self(439);
    /// The backend failed to process the request.
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);
    /// A proxy in front of the backend failed.
    pub const BAD_GATEWAY: Self = Self(502);
    /// The backend is temporarily unavailable.
    pub const SERVICE_UNAVAILABLE: Self = Self(503);
    /// A proxy in front of the backend timed out.
    pub const GATEWAY_TIMEOUT: Self = Self(504);
    /// The transport failed in a way that could not be classified.
    pub const UNKNOWN_NETWORK_ERROR: Self = Self(999);

    /// Creates a status from its numeric code.
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns `true` if the backend accepted every item.
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Returns `true` for throttling responses.
    pub fn is_throttled(self) -> bool {
        matches!(self, Self::TOO_MANY_REQUESTS | Self::TOO_MANY_REQUESTS_EXTENDED)
    }

    /// Returns `true` for transient failures after which the whole transmission is retried.
    pub fn is_transient_error(self) -> bool {
        matches!(
            self,
            Self::REQUEST_TIMEOUT
                | Self::INTERNAL_SERVER_ERROR
                | Self::BAD_GATEWAY
                | Self::SERVICE_UNAVAILABLE
                | Self::GATEWAY_TIMEOUT
                | Self::UNKNOWN_NETWORK_ERROR
        )
    }

    /// Returns `true` for credential errors.
    pub fn is_authentication_error(self) -> bool {
        matches!(self, Self::BAD_REQUEST | Self::UNAUTHORIZED | Self::FORBIDDEN)
    }

    /// Returns `true` if an item rejected with this status in a partial success response
    /// should be sent again.
    pub fn is_retryable_item(self) -> bool {
        matches!(
            self,
            Self::REQUEST_TIMEOUT
                | Self::TOO_MANY_REQUESTS
                | Self::TOO_MANY_REQUESTS_EXTENDED
                | Self::INTERNAL_SERVER_ERROR
                | Self::SERVICE_UNAVAILABLE
        )
    }
}

impl From<u16> for ResponseStatus {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
