pub mod devices;
pub mod equipment_setup;
pub mod integrity;
pub mod module_sequencer;
pub mod progress;
pub mod retake_policy;
pub mod scoring;
pub mod similarity;
pub mod simulated;
pub mod speech;
pub(crate) mod submission_finalize;
pub mod voice_capture;
pub mod work_timing;
