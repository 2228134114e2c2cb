//! Protocol value types shared by the codec, the session and handlers.

mod error;
mod request;
mod response;

pub use error::{HttpError, ParseError, SendError};
pub use request::RestRequest;
pub(crate) use request::parse_query_string;
pub use response::{APPLICATION_JSON_UTF8, RestResponse, WireResponse};
