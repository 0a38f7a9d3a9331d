mod env;

pub use env::env_or;
