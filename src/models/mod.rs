pub mod attendance;
pub mod event;
pub mod session;
pub mod ticket;
pub mod user;

pub use attendance::AttendanceRecord;
pub use event::{Event, EventUpdate, Winner};
pub use session::{CoordinatorRole, CoordinatorSession};
pub use ticket::Ticket;
pub use user::{Student, StudentPublic};
