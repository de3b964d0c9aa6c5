#![allow(dead_code)]

pub mod phantom;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
