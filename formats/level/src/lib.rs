pub mod geom;
pub mod level;
pub mod vbuf;
pub mod visual;
