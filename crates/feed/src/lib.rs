pub mod ics;
pub mod select;

pub use ics::generate_ics;
pub use select::{filter_meetings, load_meetings, DateRange};
