// Not all functions are used by all tests.
#![allow(dead_code)]

use std::sync::Once;

use tern::IoContext;

pub fn init() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        env_logger::try_init().expect("unable to initialise logger");
    })
}

pub fn init_with_context() -> IoContext {
    init();
    IoContext::new().expect("unable to create I/O context")
}

pub fn assert_send<T: Send>() {}
pub fn assert_sync<T: Sync>() {}
