pub mod command_timeouts;
pub mod push_sweeper;

pub use command_timeouts::spawn_command_timeout_sweeper;
pub use push_sweeper::spawn_push_sweeper;
