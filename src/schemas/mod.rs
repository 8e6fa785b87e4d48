//! Serialized views handed to the exam shell and the rehearsal script format.

pub mod rehearsal;
pub mod session;
