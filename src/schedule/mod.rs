pub mod schedule_index;
