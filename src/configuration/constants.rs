pub mod cargo_env {
    pub const CARGO_PKG_NAME: &str = env!("CARGO_PKG_NAME");
}

pub mod common {
    pub const MAX_WORKERS: usize = 64;
    pub const EXIT_FAILED: i32 = 1;
    pub const EXIT_LOAD_ERROR: i32 = 2;
}
