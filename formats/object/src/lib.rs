pub mod bone;
pub mod dm;
pub mod mesh;
pub mod object;
pub mod rebuild;
