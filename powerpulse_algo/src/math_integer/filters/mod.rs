pub mod fir;
pub mod iir;
