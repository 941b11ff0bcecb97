//! fmail: the project-scoped, file-backed messaging bus (`spec.md` §2-§6).

pub mod hub;
pub mod protocol;
pub mod store;
pub mod tui_state;
pub mod types;

pub use hub::{Filter, MailHub, Subscription};
pub use protocol::{AckBody, Cmd, ErrorBody, ErrorCode, Request, Response, StreamBody};
pub use store::{MailStore, StoreError};
pub use tui_state::{
    AgentGroup, Bookmark, Draft, NotificationRule, SavedSearch, TuiState, TuiStateError,
    CURRENT_VERSION as TUI_STATE_CURRENT_VERSION,
};
pub use types::{
    normalize_tags, parse_body, validate_name, AgentRecord, MailTarget, Message, Priority,
    Project, SendOptions, ValidationError, MAX_BODY_BYTES, MAX_TAGS,
};
