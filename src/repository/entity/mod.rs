//! Entity definitions for tables present in every tenant database.

pub mod fee;
pub mod student;
pub mod user;
