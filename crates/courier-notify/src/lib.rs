pub mod events;
pub mod hub;
pub mod squash;
