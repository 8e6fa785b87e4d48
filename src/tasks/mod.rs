pub(crate) mod rehearsal;
pub(crate) mod scheduler;
