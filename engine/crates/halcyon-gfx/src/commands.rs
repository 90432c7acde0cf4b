pub mod barrier;
pub mod command_buffer;
pub mod command_pool;
pub mod command_queue;
pub mod fence;
pub mod semaphore;
pub mod submit_info;
pub mod wait_timeout;
