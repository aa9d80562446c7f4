//! Transform components — input-to-output mappers.

pub mod compare;
pub mod echo;
pub mod lookup;
pub mod template;
