pub mod frames;
pub mod notifications;

/// Identifier of a platform user. The platform owns the user table;
/// courier only ever references it.
pub type UserId = i64;
