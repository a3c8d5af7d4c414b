//! Database models split into separate files.
//! This module re-exports individual model modules so callers can
//! `use crate::db::models::*;`.

pub mod calendar;
pub mod execution;
pub mod trigger;
pub mod variable;

pub use self::calendar::*;
pub use self::execution::*;
pub use self::trigger::*;
pub use self::variable::*;
