//! Domain entities and enums (§3 of the design doc).
//!
//! These types carry no behavior beyond small invariant helpers; the state
//! machine lives in `cs-engine`, persistence in `cs-repo`.

pub mod game;
pub mod issue_type;
pub mod message;
pub mod quick_reply;
pub mod satisfaction;
pub mod session;
pub mod ticket;
pub mod ticket_message;
pub mod user;

pub use game::{Game, Server};
pub use issue_type::IssueType;
pub use message::{Message, MessageType, SenderType};
pub use quick_reply::{QuickReply, QuickReplyCategory};
pub use satisfaction::SatisfactionRating;
pub use session::{Session, SessionStatus, Urgency};
pub use ticket::{Attachment, Ticket, TicketPriority, TicketStatus};
pub use ticket_message::TicketMessage;
pub use user::{Role, User};
