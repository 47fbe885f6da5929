pub mod import_commands;
pub mod media_commands;
pub mod search_commands;
pub mod socket_commands;
