pub mod wch;
pub mod wcs;
