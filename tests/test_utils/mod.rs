#[allow(dead_code)]
pub mod collector;
pub mod shared_buffer;

#[allow(unused_imports)]
pub use collector::{CollectorStub, StubOptions};
#[allow(unused_imports)]
pub use shared_buffer::SharedBuf;
