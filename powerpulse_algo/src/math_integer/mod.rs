pub mod controllers;
pub mod fifo_buffer;
pub mod filters;
pub mod iq;
