/// Error kinds surfaced at the Agent Client / Transport boundary.
///
/// Every fallible public operation in this crate returns `Result<T, Error>`.
/// Inside an Announce Unit no variant here is fatal: a tick that produces any
/// `Error` transitions the unit into `Failing` and doubles its backoff (see
/// `unit::UnitHandle`).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Could not establish a connection to the agent.
    #[error("could not connect to consul agent")]
    Connect,

    /// The request exceeded its configured deadline.
    #[error("request to consul agent timed out")]
    Timeout,

    /// Some other transport-level failure, opaque to callers.
    #[error("transport error: {0}")]
    Driver(String),

    /// The transport round-trip succeeded but the response failed the
    /// caller's success predicate (typically `status == 200`).
    #[error("consul agent returned http {status}")]
    Http {
        status: u16,
        headers: Vec<(String, String)>,
        payload: Vec<u8>,
    },

    /// The requested session, check, or service does not exist at the
    /// agent, or an Announcer child lookup came up empty.
    #[error("not found")]
    NotFound,

    /// A JSON body could not be decoded into the expected shape. Fatal only
    /// to the call that produced it.
    #[error("failed to decode json body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl Error {
    pub fn http(status: u16, headers: Vec<(String, String)>, payload: Vec<u8>) -> Self {
        Error::Http {
            status,
            headers,
            payload,
        }
    }
}
