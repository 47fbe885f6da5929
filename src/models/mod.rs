pub mod media;
pub mod search;
