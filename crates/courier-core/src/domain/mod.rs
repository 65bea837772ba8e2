//! Domain model (IDs, request/response, actions, state, errors).

pub mod action;
pub mod errors;
pub mod ids;
pub mod request;
pub mod response;
pub mod state;

pub use self::action::{Action, UploadSource};
pub use self::errors::{CourierError, ErrorKind};
pub use self::ids::{Signature, TaskId};
pub use self::request::{Body, Endpoint, Headers, Method, Request};
pub use self::response::{Content, Response};
pub use self::state::TaskState;
