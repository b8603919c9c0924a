pub mod event;
pub mod mapper;
pub mod range;
pub mod time_input;

pub use event::{Event, EventPatch, StoredEvent, TEMP_ID_PREFIX};
pub use mapper::{ColorPalette, DisplayEvent, EventMapper, ProfileDirectory};
pub use range::{is_all_day_range, EventRange};
pub use time_input::{parse_time_input, TimeInputError, TimeOfDay};
