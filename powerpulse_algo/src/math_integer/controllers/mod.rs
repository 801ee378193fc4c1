pub mod pid2;
