pub mod adc;
pub mod conv;
pub mod rms;
