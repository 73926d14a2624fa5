pub mod calendar;
pub mod store;
pub mod supabase_store;
pub mod slots;
pub mod schedule;

pub use store::{ScheduleRepository, ExclusionSource};
pub use supabase_store::SupabaseScheduleStore;
pub use slots::SlotGenerator;
pub use schedule::ScheduleService;
