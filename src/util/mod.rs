pub mod arena_queue;
pub mod bit_stream;
