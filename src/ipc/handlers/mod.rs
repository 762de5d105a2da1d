pub mod attendance;
pub mod core;
pub mod promotion;
pub mod schedules;
pub mod settings;
pub mod students;
