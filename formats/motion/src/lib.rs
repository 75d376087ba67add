pub mod anm;
pub mod envelope;
pub mod motion;
